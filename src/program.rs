//! The compiled, immutable program representation. See SPEC_FULL.md §3,
//! §4.4. A `Program` is produced once, upstream of this crate (by the
//! out-of-scope script compiler), and is read-only for the lifetime of a
//! render.
//!
//! The original's per-field "params changed" bitset is represented here
//! with `Option<T>` on each payload field: a field's presence *is* the
//! bit, which is the idiomatic Rust reading of a sparse update record.

use crate::line::LineUpdate;
use crate::wavetable::Wave;
use serde::{Deserialize, Serialize};

pub type VoiceId = u32;
pub type OperatorId = u32;

/// An operator's remaining lifetime in samples, or unbounded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpTime {
    Finite(u32),
    Infinite,
}

impl OpTime {
    pub fn is_zero(self) -> bool {
        matches!(self, OpTime::Finite(0))
    }
}

/// Operator attribute bits. `freqratio` is the one the hot path reads
/// directly (§4.5.4 step 3); it is also "linked" into the frequency
/// Line's own ratio flags when an event changes it (§4.5.2), which is
/// this crate's reading of the original's plural "linked-ramp flags".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorAttr {
    pub freqratio: bool,
}

/// Voice attribute bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceAttr {
    pub initialized: bool,
    pub executing: bool,
}

/// Per-operator modulation adjacency, partitioned by role.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Adjacency {
    pub fm: Vec<OperatorId>,
    pub pm: Vec<OperatorId>,
    pub am: Vec<OperatorId>,
}

/// The voice-scoped fields an `Event` may update.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VoicePayload {
    pub attr: Option<VoiceAttr>,
    pub pan: Option<LineUpdate>,
    /// Ordered top-level operator ids (carriers).
    pub graph: Option<Vec<OperatorId>>,
    /// Setting a new voice time resets `pos <- 0` (§4.5.2).
    pub time: Option<OpTime>,
}

/// The operator-scoped fields an `Event` may update.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OperatorPayload {
    pub wave: Option<Wave>,
    pub attr: Option<OperatorAttr>,
    pub adjacency: Option<Adjacency>,
    pub silence: Option<u32>,
    pub time: Option<OpTime>,
    pub freq: Option<LineUpdate>,
    pub dynfreq: Option<f32>,
    /// Fractional phase in `[0, 1)`, mapped to a 32-bit phase value.
    pub phase: Option<f32>,
    pub amp: Option<LineUpdate>,
    pub dynamp: Option<f32>,
}

/// A time-ordered record of parameter changes applied at a specific
/// sample position, expressed relative to the previous event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    /// Delay, in samples, from the previous event's activation.
    pub wait_samples: u32,
    pub voice_id: Option<VoiceId>,
    pub operator_id: Option<OperatorId>,
    pub voice: Option<VoicePayload>,
    pub operator: Option<OperatorPayload>,
}

/// Program-wide behavior flags.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct ProgramFlags {
    /// Divide amplitude by `voice_count` (fixed at `Generator::new`, per
    /// §9's Open Question: the source scales at construction even if
    /// `voice_count` were to change later, which cannot happen here
    /// since `Program` is immutable once built).
    pub divide_amp_by_voice_count: bool,
}

/// The compiled program: an ordered sequence of events plus totals.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Program {
    pub voice_count: u32,
    pub operator_count: u32,
    pub events: Vec<Event>,
    pub flags: ProgramFlags,
    pub amp_scale: f32,
}

impl Program {
    /// Structural validation: every referenced id is within range. This
    /// is the `BadProgram` check run at `Generator::new` (§7).
    pub fn validate(&self) -> Result<(), String> {
        for (i, event) in self.events.iter().enumerate() {
            if let Some(vid) = event.voice_id {
                if vid >= self.voice_count {
                    return Err(format!(
                        "event {i}: voice id {vid} out of range (voice_count = {})",
                        self.voice_count
                    ));
                }
            }
            if let Some(oid) = event.operator_id {
                if oid >= self.operator_count {
                    return Err(format!(
                        "event {i}: operator id {oid} out of range (operator_count = {})",
                        self.operator_count
                    ));
                }
            }
            if let Some(voice) = &event.voice {
                if let Some(graph) = &voice.graph {
                    for &oid in graph {
                        if oid >= self.operator_count {
                            return Err(format!(
                                "event {i}: carrier id {oid} out of range (operator_count = {})",
                                self.operator_count
                            ));
                        }
                    }
                }
            }
            if let Some(op) = &event.operator {
                if let Some(adj) = &op.adjacency {
                    for &oid in adj.fm.iter().chain(&adj.pm).chain(&adj.am) {
                        if oid >= self.operator_count {
                            return Err(format!(
                                "event {i}: modulator id {oid} out of range (operator_count = {})",
                                self.operator_count
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Total sample count implied by this program's wait times and the
    /// longest-lived operator's remaining time, per §8 invariant 3. This
    /// only accounts for the waits between events; a program whose
    /// operators outlive the last event's wait runs further still, which
    /// is why this is a lower bound used by tests, not an exact oracle.
    pub fn total_wait_samples(&self) -> u64 {
        self.events.iter().map(|e| e.wait_samples as u64).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_out_of_range_voice() {
        let program = Program {
            voice_count: 1,
            operator_count: 1,
            events: vec![Event {
                wait_samples: 0,
                voice_id: Some(5),
                operator_id: None,
                voice: None,
                operator: None,
            }],
            flags: ProgramFlags::default(),
            amp_scale: 1.0,
        };
        assert!(program.validate().is_err());
    }

    #[test]
    fn validate_accepts_in_range_ids() {
        let program = Program {
            voice_count: 2,
            operator_count: 2,
            events: vec![Event {
                wait_samples: 0,
                voice_id: Some(1),
                operator_id: Some(1),
                voice: None,
                operator: None,
            }],
            flags: ProgramFlags::default(),
            amp_scale: 1.0,
        };
        assert!(program.validate().is_ok());
    }
}
