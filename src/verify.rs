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

use std::collections::{BTreeMap, HashMap};

use crate::config::{self, Config};
use crate::samples::BufferProvider;

/// Severity level for a verification issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// A single verification issue found during checking.
#[derive(Debug, Clone)]
pub struct Issue {
    pub severity: Severity,
    pub category: &'static str,
    pub bank: String,
    pub message: String,
}

/// Result of verifying a configuration.
#[derive(Debug, Clone, Default)]
pub struct VerificationReport {
    pub issues: Vec<Issue>,
}

impl VerificationReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    /// Merge another report into this one.
    pub fn merge(&mut self, other: VerificationReport) {
        self.issues.extend(other.issues);
    }
}

/// Checks one bank: every pad must resolve to a unique slot, decode, and have a
/// trim window inside its source.
pub fn check_bank(bank: &config::Bank, provider: &dyn BufferProvider) -> Vec<Issue> {
    let issue = |severity, category, message| Issue {
        severity,
        category,
        bank: bank.name().to_string(),
        message,
    };

    if bank.pads().is_empty() {
        return vec![issue(
            Severity::Warning,
            "pads",
            "bank has no pads".to_string(),
        )];
    }

    let mut issues = Vec::new();
    let mut slots: HashMap<usize, &str> = HashMap::new();
    let mut durations: HashMap<&str, Option<f64>> = HashMap::new();

    for pad in bank.pads() {
        match pad.slot_index(bank.name()) {
            Ok(slot) => {
                if let Some(existing) = slots.insert(slot, pad.sample()) {
                    issues.push(issue(
                        Severity::Error,
                        "pads",
                        format!(
                            "slot {} is used by both {} and {}",
                            slot + 1,
                            existing,
                            pad.sample()
                        ),
                    ));
                }
            }
            Err(e) => issues.push(issue(Severity::Error, "pads", e.to_string())),
        }

        let duration = *durations
            .entry(pad.file())
            .or_insert_with(|| match provider.decode(pad.file()) {
                Ok(buffer) => Some(buffer.duration_secs()),
                Err(e) => {
                    issues.push(issue(Severity::Error, "sources", e.to_string()));
                    None
                }
            });
        let Some(duration) = duration else {
            continue;
        };

        let start = pad.trim_start();
        let end = pad.trim_end().unwrap_or(duration);
        if !(start >= 0.0 && end > start && end <= duration) {
            issues.push(issue(
                Severity::Error,
                "trims",
                format!(
                    "sample {} trims [{}s, {}s] outside {} ({:.3}s)",
                    pad.sample(),
                    start,
                    end,
                    pad.file(),
                    duration
                ),
            ));
        }
    }

    issues
}

/// Checks that a sample id always refers to the same chop. Banks share one
/// repository, so a conflicting definition would replace the other.
pub fn check_sample_ids(banks: &[config::Bank]) -> Vec<Issue> {
    let mut seen: HashMap<&str, (&str, &config::Pad)> = HashMap::new();
    let mut issues = Vec::new();

    for bank in banks {
        for pad in bank.pads() {
            match seen.get(pad.sample()) {
                Some((first_bank, first))
                    if first.file() != pad.file()
                        || first.trim_start() != pad.trim_start()
                        || first.trim_end() != pad.trim_end() =>
                {
                    issues.push(Issue {
                        severity: Severity::Error,
                        category: "sample-ids",
                        bank: bank.name().to_string(),
                        message: format!(
                            "sample {} is defined differently in bank {}",
                            pad.sample(),
                            first_bank
                        ),
                    });
                }
                Some(_) => {}
                None => {
                    seen.insert(pad.sample(), (bank.name(), pad));
                }
            }
        }
    }

    issues
}

/// Checks every bank in a configuration.
pub fn check_config(config: &Config, provider: &dyn BufferProvider) -> VerificationReport {
    let mut report = VerificationReport::default();
    for bank in config.banks() {
        report.issues.extend(check_bank(bank, provider));
    }
    report.issues.extend(check_sample_ids(config.banks()));
    report
}

/// Prints a verification report grouped by bank name.
pub fn print_report(report: &VerificationReport, banks: &[config::Bank]) {
    if report.is_clean() {
        println!("\u{2705} All {} bank(s) passed verification.", banks.len());
        return;
    }

    let mut by_bank: BTreeMap<&str, Vec<&Issue>> = BTreeMap::new();
    for issue in &report.issues {
        by_bank.entry(&issue.bank).or_default().push(issue);
    }

    let clean_count = banks
        .iter()
        .filter(|bank| !by_bank.contains_key(bank.name()))
        .count();

    for (bank, issues) in &by_bank {
        let has_errors = issues.iter().any(|i| i.severity == Severity::Error);
        let icon = if has_errors {
            "\u{274c}"
        } else {
            "\u{26a0}\u{fe0f} "
        };
        println!("{} {}", icon, bank);
        for issue in issues {
            let severity_icon = match issue.severity {
                Severity::Warning => "\u{26a0}\u{fe0f} ",
                Severity::Error => "\u{274c}",
            };
            println!("   {} [{}] {}", severity_icon, issue.category, issue.message);
        }
    }

    if clean_count > 0 {
        println!("\u{2705} {} other bank(s) passed verification.", clean_count);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::samples::{DecodedBuffer, ProviderError};

    /// Every source is one second long, except "broken.wav".
    struct OneSecond;

    impl BufferProvider for OneSecond {
        fn decode(&self, source: &str) -> Result<DecodedBuffer, ProviderError> {
            if source == "broken.wav" {
                return Err(ProviderError::UnknownSource(source.to_string()));
            }
            Ok(DecodedBuffer::new(vec![vec![0.0; 100]], 100))
        }
    }

    fn bank(name: &str, pads: Vec<config::Pad>) -> config::Bank {
        config::Bank::new(name, pads)
    }

    #[test]
    fn test_clean_bank() {
        let bank = bank(
            "A",
            vec![
                config::Pad::new("q", "A1", "a.wav", 0.0, Some(0.5)),
                config::Pad::new("w", "A2", "a.wav", 0.5, None),
            ],
        );
        assert!(check_bank(&bank, &OneSecond).is_empty());
    }

    #[test]
    fn test_trim_outside_source() {
        let bank = bank(
            "A",
            vec![config::Pad::new("q", "A1", "a.wav", 0.5, Some(1.5))],
        );
        let issues = check_bank(&bank, &OneSecond);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].category, "trims");
        assert_eq!(issues[0].severity, Severity::Error);
    }

    #[test]
    fn test_bad_pads_and_sources() {
        let bank = bank(
            "A",
            vec![
                config::Pad::new("q", "A1", "a.wav", 0.0, None),
                config::Pad::new("1", "A2", "a.wav", 0.0, None),
                config::Pad::new("F13", "A3", "broken.wav", 0.0, None),
                config::Pad::new("e", "A4", "broken.wav", 0.0, None),
            ],
        );
        let issues = check_bank(&bank, &OneSecond);
        let categories: Vec<&str> = issues.iter().map(|i| i.category).collect();
        // The broken source is reported once.
        assert_eq!(categories, vec!["pads", "pads", "sources"]);
    }

    #[test]
    fn test_empty_bank_warns() {
        let issues = check_bank(&bank("A", vec![]), &OneSecond);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Warning);
    }

    #[test]
    fn test_conflicting_sample_ids() {
        let banks = vec![
            bank("A", vec![config::Pad::new("q", "kick", "a.wav", 0.0, Some(0.5))]),
            bank("B", vec![config::Pad::new("q", "kick", "a.wav", 0.0, Some(0.5))]),
            bank("C", vec![config::Pad::new("q", "kick", "a.wav", 0.1, Some(0.5))]),
        ];
        let issues = check_sample_ids(&banks);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].bank, "C");
    }

    #[test]
    fn test_verification_report() {
        let mut report = VerificationReport::default();
        assert!(report.is_clean());
        assert!(!report.has_errors());

        report.merge(VerificationReport {
            issues: check_bank(&bank("A", vec![]), &OneSecond),
        });
        assert!(!report.is_clean());
        assert!(!report.has_errors());

        report.merge(VerificationReport {
            issues: check_sample_ids(&[
                bank("A", vec![config::Pad::new("q", "x", "a.wav", 0.0, None)]),
                bank("B", vec![config::Pad::new("q", "x", "b.wav", 0.0, None)]),
            ]),
        });
        assert!(report.has_errors());
    }
}
