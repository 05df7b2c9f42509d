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

//! Chop storage and voice playback.
//!
//! This module provides:
//! - Decoded source buffers and the providers that supply them
//! - Trimmed, in-memory chops ready for zero-latency triggering
//! - Voice allocation with a polyphony ceiling

mod provider;
mod repository;
mod voice;

pub use provider::{BufferProvider, DecodedBuffer, ProviderError, WavFileProvider};
pub use repository::{ConfigurationError, PreloadedSample, SampleRepository};
pub use voice::{AllocationError, VoiceAllocator, VoiceHandle, VoiceId, VoiceState};
