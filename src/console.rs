// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Line-based keyboard console. Every character of a line is a key press; lines
//! starting with ':' are commands.

use std::{fs, io};

use tracing::{info, warn};

use crate::input::{InputRouter, KeyEvent, PhysicalKey};

const BANK: &str = ":bank";
const STOP: &str = ":stop";
const STATS: &str = ":stats";
const EXPORT: &str = ":export";
const QUIT: &str = ":quit";

/// Reads lines until EOF or :quit.
pub fn run<R, W>(router: &InputRouter, mut reader: R, mut writer: W) -> Result<(), io::Error>
where
    R: io::BufRead,
    W: io::Write,
{
    info!("Console started.");
    loop {
        write!(
            writer,
            "Keys or command ({} <name>, {}, {}, {} <path>, {}): ",
            BANK, STOP, STATS, EXPORT, QUIT
        )?;
        writer.flush()?;

        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(());
        }
        if !handle_line(router, line.trim(), &mut writer)? {
            return Ok(());
        }
    }
}

/// Handles one line. Returns false when the console should exit.
fn handle_line<W: io::Write>(router: &InputRouter, line: &str, writer: &mut W) -> Result<bool, io::Error> {
    let (command, argument) = match line.split_once(char::is_whitespace) {
        Some((command, argument)) => (command, argument.trim()),
        None => (line, ""),
    };

    match command {
        QUIT => return Ok(false),
        BANK => {
            if !router.set_active_bank(argument) {
                writeln!(writer, "No bank named {:?}", argument)?;
            }
        }
        STOP => {
            let stopped = router.engine().stop_all_samples();
            writeln!(writer, "Stopped {} voice(s)", stopped)?;
        }
        STATS => {
            let stats = serde_json::json!({
                "metrics": router.engine().performance_metrics(),
                "analysis": router.monitor().analysis(),
            });
            writeln!(writer, "{:#}", stats)?;
        }
        EXPORT => {
            let data = router
                .monitor()
                .export_data()
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            match fs::write(argument, data) {
                Ok(()) => writeln!(writer, "Exported latency data to {}", argument)?,
                Err(e) => {
                    warn!(path = argument, err = %e, "Unable to export latency data");
                    writeln!(writer, "Unable to write {}: {}", argument, e)?;
                }
            }
        }
        _ if line.starts_with(':') => {
            warn!(input = line, "Unrecognized command");
        }
        _ => press_keys(router, line, writer)?,
    }
    Ok(true)
}

fn press_keys<W: io::Write>(router: &InputRouter, keys: &str, writer: &mut W) -> Result<(), io::Error> {
    for c in keys.chars().filter(|c| !c.is_whitespace()) {
        let Some(key) = PhysicalKey::from_char(c) else {
            continue;
        };
        if let Some(result) = router.key_down(KeyEvent::new(key)) {
            match result.error() {
                None => writeln!(writer, "{} {:.3}ms", key, result.latency_ms)?,
                Some(e) => writeln!(writer, "{} {}", key, e)?,
            }
        }
        router.key_up(key);
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use std::{io::BufReader, sync::Arc};

    use super::run;
    use crate::config;
    use crate::engine::TriggerEngine;
    use crate::input::{Bank, InputRouter, PadSample};
    use crate::latency::LatencyMonitor;
    use crate::samples::{BufferProvider, DecodedBuffer, ProviderError};
    use crate::testutil::{mock_audio, stereo_buffer};

    struct Fixed;

    impl BufferProvider for Fixed {
        fn decode(&self, _: &str) -> Result<DecodedBuffer, ProviderError> {
            Ok(stereo_buffer(44100, 1.0))
        }
    }

    fn router() -> InputRouter {
        let engine = Arc::new(TriggerEngine::new(&mock_audio(), &config::Voices::default()).unwrap());
        engine.initialize().unwrap();
        let monitor = Arc::new(LatencyMonitor::new(
            engine.clock().clone(),
            Default::default(),
            10,
        ));
        let pad = PadSample {
            sample_id: "A1".to_string(),
            source: "a.wav".to_string(),
            trim_start: 0.0,
            trim_end: None,
        };
        let router = InputRouter::new(
            engine,
            monitor,
            Arc::new(Fixed),
            vec![Bank::new("A").with_pad(0, pad), Bank::new("B")],
            &config::Input::default(),
        )
        .unwrap();
        router.preload_active_bank();
        router
    }

    fn console(router: &InputRouter, input: &str) -> String {
        let mut output = Vec::new();
        run(router, BufReader::new(input.as_bytes()), &mut output).unwrap();
        String::from_utf8(output).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_keys_and_commands() {
        let router = router();

        let output = console(&router, "q\n:stop\n:bank B\n:bank C\n:quit\nq\n");
        assert!(output.contains("KeyQ "), "{output}");
        assert!(output.contains("Stopped 1 voice(s)"), "{output}");
        assert!(output.contains("No bank named \"C\""), "{output}");
        assert_eq!(router.active_bank().as_deref(), Some("B"));
        // Nothing after :quit is read.
        assert_eq!(router.engine().active_voice_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stats_and_export() {
        let router = router();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latency.json");

        let output = console(
            &router,
            &format!(":stats\n:export {}\n", path.display()),
        );
        assert!(output.contains("averageLatency"), "{output}");
        assert!(output.contains("Exported latency data"), "{output}");
        let exported: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert!(exported["measurements"].is_object());
    }
}
