//! The Generator: executes a [`Program`] one block at a time, walking
//! each voice's operator graph and mixing the result into an interleaved
//! int16 stereo block. See SPEC_FULL.md §4.5.
//!
//! The source's manually-indexed scratch-buffer stack is kept as a
//! grow-only pool of `BUF_LEN`-sized arrays (`upsize_bufs`, matching
//! §4.5.4), but buffers that don't need to outlive a single recursive
//! step (FM/PM/AM accumulators, the amplitude buffer) are ordinary local
//! `Vec<f32>`s instead of further pool slots — the call stack already
//! gives those the right lifetime, so there is nothing to be gained by
//! routing them through manual indices.

use std::collections::HashSet;

use crate::error::{Result, SynthError};
use crate::line::Line;
use crate::oscillator::Oscillator;
use crate::program::{
    Event, OpTime, OperatorAttr, OperatorId, OperatorPayload, Program, VoiceAttr, VoiceId, VoicePayload,
};
use crate::wavetable;

/// Scratch buffer length, in samples, used as the unit of the grow-only
/// buffer pool and as the chunk size `run_voice` processes in.
pub const BUF_LEN: usize = 256;

#[derive(Clone)]
struct OperatorState {
    wave: wavetable::Wave,
    attr: OperatorAttr,
    osc: Oscillator,
    freq: Line,
    dynfreq: f32,
    amp: Line,
    dynamp: f32,
    silence: u32,
    time: OpTime,
    adjacency: crate::program::Adjacency,
}

impl Default for OperatorState {
    fn default() -> Self {
        OperatorState {
            wave: wavetable::Wave::Sin,
            attr: OperatorAttr::default(),
            osc: Oscillator::new(),
            freq: Line::constant(0.0),
            dynfreq: 0.0,
            amp: Line::constant(0.0),
            dynamp: 0.0,
            silence: 0,
            time: OpTime::Infinite,
            adjacency: crate::program::Adjacency::default(),
        }
    }
}

#[derive(Clone)]
struct VoiceState {
    pan: Line,
    graph: Vec<OperatorId>,
    attr: VoiceAttr,
    /// Elapsed samples since the voice was last (re)activated.
    pos: u64,
}

impl Default for VoiceState {
    fn default() -> Self {
        VoiceState {
            pan: Line::constant(0.5),
            graph: Vec::new(),
            attr: VoiceAttr::default(),
            pos: 0,
        }
    }
}

/// Executes a [`Program`] block by block. Not thread-safe; the render
/// loop drives one `Generator` serially (§5).
pub struct Generator {
    program: Program,
    sample_rate: u32,
    voices: Vec<VoiceState>,
    operators: Vec<OperatorState>,
    pool: Vec<[f32; BUF_LEN]>,
    visited: Vec<bool>,
    cycle_reported: HashSet<OperatorId>,
    event_index: usize,
    /// Samples remaining until the event at `event_index` fires, or
    /// `None` once the program has no more events.
    wait_remaining: Option<u64>,
    sample_clock: u64,
}

impl Generator {
    pub fn new(program: Program, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(SynthError::BadProgram {
                reason: "sample rate must be positive".into(),
            });
        }
        program.validate().map_err(|reason| SynthError::BadProgram { reason })?;

        wavetable::init();

        let voices = vec![VoiceState::default(); program.voice_count as usize];
        let operators = vec![OperatorState::default(); program.operator_count as usize];
        let visited = vec![false; program.operator_count as usize];
        let wait_remaining = program.events.first().map(|e| e.wait_samples as u64);

        let mut gen = Generator {
            program,
            sample_rate,
            voices,
            operators,
            pool: vec![[0.0; BUF_LEN]; 2],
            visited,
            cycle_reported: HashSet::new(),
            event_index: 0,
            wait_remaining,
            sample_clock: 0,
        };
        gen.upsize_bufs();
        Ok(gen)
    }

    pub fn sample_clock(&self) -> u64 {
        self.sample_clock
    }

    /// Produce up to `out.len() / channels` frames into `out`, applying
    /// any events that fall within the span with sample-accurate timing
    /// (§4.5.1). Returns `(produced_samples, more)`; `more` is false once
    /// there is no further work for this program.
    pub fn run(&mut self, out: &mut [i16], stereo: bool) -> (usize, bool) {
        for s in out.iter_mut() {
            *s = 0;
        }
        let channels = if stereo { 2 } else { 1 };
        let total_len = out.len() / channels;
        let mut produced = 0usize;
        let mut remaining = total_len;

        loop {
            while self.wait_remaining == Some(0) {
                self.fire_next_event();
            }
            if remaining == 0 {
                break;
            }
            let mut len = remaining;
            if let Some(w) = self.wait_remaining {
                len = len.min(w as usize);
            }
            let start = produced;
            self.process_voices(&mut out[start * channels..(start + len) * channels], len, stereo);
            self.sample_clock += len as u64;
            if let Some(w) = self.wait_remaining.as_mut() {
                *w -= len as u64;
            }
            produced += len;
            remaining -= len;
        }

        let more = self.has_more_work();
        (produced * channels, more)
    }

    fn has_more_work(&self) -> bool {
        if self.event_index < self.program.events.len() {
            return true;
        }
        self.voices.iter().any(|v| v.attr.executing)
    }

    fn fire_next_event(&mut self) {
        match self.program.events.get(self.event_index).cloned() {
            Some(event) => {
                self.apply_event(event);
                self.event_index += 1;
                self.wait_remaining = self
                    .program
                    .events
                    .get(self.event_index)
                    .map(|e| e.wait_samples as u64);
            }
            None => self.wait_remaining = None,
        }
    }

    // ---- event application (§4.5.2) ----

    fn apply_event(&mut self, event: Event) {
        // Operator state first: voice graph changes may depend on the
        // adjacency updates just applied, and buffer-pool sizing must
        // see the final operator state.
        if let (Some(oid), Some(payload)) = (event.operator_id, event.operator) {
            self.apply_operator_payload(oid, payload);
        }
        if let (Some(vid), Some(payload)) = (event.voice_id, event.voice) {
            self.apply_voice_payload(vid, payload);
        }
    }

    fn apply_operator_payload(&mut self, oid: OperatorId, payload: OperatorPayload) {
        let idx = oid as usize;
        let prior_freqratio = self.operators[idx].attr.freqratio;

        if let Some(wave) = payload.wave {
            self.operators[idx].wave = wave;
        }
        if let Some(mut attr) = payload.attr {
            // FREQRATIO only takes effect alongside a fresh freq Line
            // update; otherwise it is preserved from prior state (§4.5.2).
            if payload.freq.is_none() {
                attr.freqratio = prior_freqratio;
            }
            self.operators[idx].attr = attr;
        }
        let mut graph_changed = false;
        if let Some(adjacency) = payload.adjacency {
            self.operators[idx].adjacency = adjacency;
            graph_changed = true;
        }
        if let Some(silence) = payload.silence {
            self.operators[idx].silence = silence;
        }
        if let Some(time) = payload.time {
            self.operators[idx].time = time;
        }
        if let Some(update) = payload.freq {
            self.operators[idx].freq.apply_update(&update);
            // Link the freq Line's own ratio flag to the attribute bit.
            self.operators[idx].freq.state_ratio = self.operators[idx].attr.freqratio;
        }
        if let Some(dynfreq) = payload.dynfreq {
            self.operators[idx].dynfreq = dynfreq;
        }
        if let Some(frac) = payload.phase {
            self.operators[idx].osc.phase = Oscillator::phase_from_fraction(frac);
        }
        if let Some(update) = payload.amp {
            self.operators[idx].amp.apply_update(&update);
        }
        if let Some(dynamp) = payload.dynamp {
            self.operators[idx].dynamp = dynamp;
        }
        if graph_changed {
            self.upsize_bufs();
        }
    }

    fn apply_voice_payload(&mut self, vid: VoiceId, payload: VoicePayload) {
        let idx = vid as usize;
        if let Some(attr) = payload.attr {
            self.voices[idx].attr = attr;
        }
        if let Some(update) = payload.pan {
            self.voices[idx].pan.apply_update(&update);
        }
        if let Some(graph) = payload.graph {
            self.voices[idx].graph = graph;
            self.upsize_bufs();
        }
        if let Some(time) = payload.time {
            self.voices[idx].pos = 0;
            self.voices[idx].attr.executing = !matches!(time, OpTime::Finite(0));
        }
    }

    // ---- buffer pool sizing (§4.5.4) ----

    fn required_bufs(&self, op_id: OperatorId, visiting: &mut [bool]) -> usize {
        if visiting[op_id as usize] {
            // A revisit still needs its own output slot to zero-fill
            // before the runtime cycle guard bails out of it.
            return 1;
        }
        visiting[op_id as usize] = true;
        let op = &self.operators[op_id as usize];
        let has_pm = !op.adjacency.pm.is_empty();
        let mut max_child = 0usize;
        for &m in op.adjacency.fm.iter().chain(&op.adjacency.pm).chain(&op.adjacency.am) {
            max_child = max_child.max(self.required_bufs(m, visiting));
        }
        visiting[op_id as usize] = false;
        2 + usize::from(has_pm) + max_child
    }

    fn upsize_bufs(&mut self) {
        let mut needed = 1usize;
        let mut visiting = vec![false; self.operators.len()];
        for voice in self.voices.clone() {
            for &carrier in &voice.graph {
                visiting.iter_mut().for_each(|v| *v = false);
                needed = needed.max(self.required_bufs(carrier, &mut visiting));
            }
        }
        if self.pool.len() < needed {
            self.pool.resize(needed, [0.0; BUF_LEN]);
        }
    }

    // ---- voice execution (§4.5.3) ----

    fn process_voices(&mut self, out: &mut [i16], len: usize, stereo: bool) {
        for vid in 0..self.voices.len() {
            if !self.voices[vid].attr.executing {
                continue;
            }
            self.run_voice(vid, out, len, stereo);
            self.voices[vid].pos += len as u64;
            let graph = self.voices[vid].graph.clone();
            if graph.iter().all(|&c| self.carrier_finished(c)) {
                self.voices[vid].attr.executing = false;
            }
        }
    }

    fn carrier_finished(&self, op_id: OperatorId) -> bool {
        let op = &self.operators[op_id as usize];
        op.silence == 0 && matches!(op.time, OpTime::Finite(0))
    }

    fn run_voice(&mut self, vid: usize, out: &mut [i16], len: usize, stereo: bool) {
        let channels = if stereo { 2 } else { 1 };
        let graph = self.voices[vid].graph.clone();
        if graph.is_empty() {
            return;
        }
        let divide = self.program.flags.divide_amp_by_voice_count;
        let voice_count = (self.program.voice_count.max(1)) as f32;

        let mut processed = 0usize;
        while processed < len {
            let chunk = (len - processed).min(BUF_LEN);

            for s in self.pool[0][..chunk].iter_mut() {
                *s = 0.0;
            }
            for (carrier_index, &carrier) in graph.iter().enumerate() {
                self.run_block(0, 0, chunk, carrier, None, false, carrier_index);
            }

            let mut pan_buf = vec![0.5f32; chunk];
            let mut pan_line = self.voices[vid].pan;
            if pan_line.goal {
                pan_line.run(&mut pan_buf, None);
                self.voices[vid].pan = pan_line;
            } else {
                for p in pan_buf.iter_mut() {
                    *p = pan_line.v0;
                }
            }

            for i in 0..chunk {
                let mut s = self.pool[0][i] * self.program.amp_scale;
                if divide {
                    s /= voice_count;
                }
                let frame = processed + i;
                if stereo {
                    let pan = pan_buf[i];
                    let left = crate::math::round_to_i16(s * (1.0 - pan));
                    let right = crate::math::round_to_i16(s * pan);
                    mix_into(&mut out[frame * channels], left);
                    mix_into(&mut out[frame * channels + 1], right);
                } else {
                    let v = crate::math::round_to_i16(s);
                    mix_into(&mut out[frame], v);
                }
            }

            processed += chunk;
        }
    }

    // ---- operator evaluation (§4.5.4) ----

    #[allow(clippy::too_many_arguments)]
    fn run_block(
        &mut self,
        pool_offset: usize,
        out_off: usize,
        len: usize,
        op_id: OperatorId,
        parent_freq_offset: Option<usize>,
        wave_env: bool,
        acc_ind: usize,
    ) {
        let mut op = self.operators[op_id as usize].clone();

        // Step 1: pre-start silence.
        if op.silence > 0 {
            let skip = (op.silence as usize).min(len);
            // Overwrite (acc_ind == 0) zero-fills; multiplicative siblings
            // (wave_env, FM/AM chains) must annihilate the running product
            // to zero too, not just leave it untouched like the additive
            // (acc_ind > 0, !wave_env) case does.
            if acc_ind == 0 || wave_env {
                for i in 0..skip {
                    self.pool[pool_offset][out_off + i] = 0.0;
                }
            }
            op.silence -= skip as u32;
            if let OpTime::Finite(t) = op.time {
                op.time = OpTime::Finite(t.saturating_sub(skip as u32));
            }
            self.operators[op_id as usize] = op;
            if skip >= len {
                return;
            }
            self.run_block(pool_offset, out_off + skip, len - skip, op_id, parent_freq_offset, wave_env, acc_ind);
            return;
        }

        let active_len = match op.time {
            OpTime::Finite(t) => (t as usize).min(len),
            OpTime::Infinite => len,
        };
        if active_len == 0 {
            if acc_ind == 0 || wave_env {
                for i in 0..len {
                    self.pool[pool_offset][out_off + i] = 0.0;
                }
            }
            return;
        }

        // Step 2: cycle guard.
        if self.visited[op_id as usize] {
            if self.cycle_reported.insert(op_id) {
                log::warn!("operator {op_id}: modulation cycle detected, silencing subtree");
            }
            if acc_ind == 0 || wave_env {
                for i in 0..len {
                    self.pool[pool_offset][out_off + i] = 0.0;
                }
            }
            return;
        }
        self.visited[op_id as usize] = true;

        let has_pm = !op.adjacency.pm.is_empty();
        let freq_buf = pool_offset + 1;
        let pm_buf = if has_pm { Some(pool_offset + 2) } else { None };
        let scratch_base = pool_offset + if has_pm { 3 } else { 2 };

        // Step 3: frequency.
        let ratio_source = if op.attr.freqratio { parent_freq_offset } else { None };
        let mul_vec: Option<Vec<f32>> =
            ratio_source.map(|p| (0..active_len).map(|i| self.pool[p][out_off + i]).collect());
        let mut freq_local = vec![0.0f32; active_len];
        op.freq.run(&mut freq_local, mul_vec.as_deref());
        self.pool[freq_buf][out_off..out_off + active_len].copy_from_slice(&freq_local);

        if !op.adjacency.fm.is_empty() {
            let fm_mods = op.adjacency.fm.clone();
            for (i, &m) in fm_mods.iter().enumerate() {
                self.run_block(scratch_base, out_off, active_len, m, Some(freq_buf), true, i);
            }
            for i in 0..active_len {
                let fm = self.pool[scratch_base][out_off + i];
                let freq = self.pool[freq_buf][out_off + i];
                let delta = if op.attr.freqratio {
                    let parent = parent_freq_offset.map(|p| self.pool[p][out_off + i]).unwrap_or(1.0);
                    op.dynfreq * parent - freq
                } else {
                    op.dynfreq - freq
                };
                self.pool[freq_buf][out_off + i] = freq + delta * fm;
            }
        }

        // Step 4: phase modulation.
        if let Some(pmb) = pm_buf {
            let pm_mods = op.adjacency.pm.clone();
            for (i, &m) in pm_mods.iter().enumerate() {
                self.run_block(scratch_base, out_off, active_len, m, Some(freq_buf), false, i);
            }
            for i in 0..active_len {
                self.pool[pmb][out_off + i] = self.pool[scratch_base][out_off + i];
            }
        }

        // Step 5: amplitude (carrier/modulator path only, never envelopes).
        let mut amp_local = vec![0.0f32; active_len];
        if !wave_env {
            op.amp.run(&mut amp_local, None);
            if !op.adjacency.am.is_empty() {
                let am_mods = op.adjacency.am.clone();
                for (i, &m) in am_mods.iter().enumerate() {
                    self.run_block(scratch_base, out_off, active_len, m, Some(freq_buf), true, i);
                }
                for i in 0..active_len {
                    let am = self.pool[scratch_base][out_off + i];
                    let base = amp_local[i];
                    amp_local[i] = base + am * (op.dynamp - base);
                }
            }
        }

        // Step 6: sample synthesis.
        for i in 0..active_len {
            let pm_phase = pm_buf.map(|p| self.pool[p][out_off + i]).unwrap_or(0.0);
            let pm_int = pm_phase.round() as i32;
            let freq = self.pool[freq_buf][out_off + i];
            let delta = Oscillator::step(freq, self.sample_rate as f64);
            if wave_env {
                let v = op.osc.run_sf(op.wave, pm_int, delta);
                if acc_ind == 0 {
                    self.pool[pool_offset][out_off + i] = v;
                } else {
                    self.pool[pool_offset][out_off + i] *= v;
                }
            } else {
                // Raw amplitude-scaled float, deliberately not clamped to
                // int16 here: this branch also runs PM modulator chains,
                // whose amplitude carries a full phase-offset magnitude.
                // The int16 scale-and-round happens once, in `run_voice`.
                let v = op.osc.run_s16(op.wave, pm_int, amp_local[i], delta);
                if acc_ind == 0 {
                    self.pool[pool_offset][out_off + i] = v;
                } else {
                    self.pool[pool_offset][out_off + i] += v;
                }
            }
        }

        if active_len < len && acc_ind == 0 {
            for i in active_len..len {
                self.pool[pool_offset][out_off + i] = 0.0;
            }
        }

        if let OpTime::Finite(t) = op.time {
            op.time = OpTime::Finite(t - active_len as u32);
        }

        self.visited[op_id as usize] = false;
        self.operators[op_id as usize] = op;
    }
}

#[inline]
fn mix_into(slot: &mut i16, add: i16) {
    let sum = *slot as i32 + add as i32;
    *slot = sum.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line::LineUpdate;
    use crate::program::{Adjacency, Event, OperatorPayload, ProgramFlags, VoicePayload};
    use crate::wavetable::Wave;

    fn single_voice_program(freq: f32, amp: f32, time: u32, pan: f32) -> Program {
        Program {
            voice_count: 1,
            operator_count: 1,
            events: vec![Event {
                wait_samples: 0,
                voice_id: Some(0),
                operator_id: Some(0),
                voice: Some(VoicePayload {
                    attr: Some(VoiceAttr { initialized: true, executing: true }),
                    pan: Some(LineUpdate {
                        v0: Some(pan),
                        vt: None,
                        end: None,
                        curve: None,
                        state_ratio: None,
                        goal_ratio: None,
                    }),
                    graph: Some(vec![0]),
                    time: Some(OpTime::Finite(time)),
                }),
                operator: Some(OperatorPayload {
                    wave: Some(Wave::Sin),
                    attr: None,
                    adjacency: Some(Adjacency::default()),
                    silence: Some(0),
                    time: Some(OpTime::Finite(time)),
                    freq: Some(LineUpdate {
                        v0: Some(freq),
                        vt: None,
                        end: None,
                        curve: None,
                        state_ratio: None,
                        goal_ratio: None,
                    }),
                    dynfreq: None,
                    phase: None,
                    amp: Some(LineUpdate {
                        v0: Some(amp),
                        vt: None,
                        end: None,
                        curve: None,
                        state_ratio: None,
                        goal_ratio: None,
                    }),
                    dynamp: None,
                }),
            }],
            flags: ProgramFlags::default(),
            amp_scale: 1.0,
        }
    }

    #[test]
    fn silence_program_yields_all_zero_frames_and_completes() {
        let program = single_voice_program(440.0, 0.0, 4800, 0.5);
        let mut gen = Generator::new(program, 48000).unwrap();
        let mut out = vec![0i16; 4800 * 2];
        let (produced, more) = gen.run(&mut out, true);
        assert_eq!(produced, 4800 * 2);
        assert!(out.iter().all(|&s| s == 0));
        assert!(!more);
    }

    #[test]
    fn pure_tone_stays_within_amplitude_bound() {
        let program = single_voice_program(440.0, 0.5, 48000, 0.5);
        let mut gen = Generator::new(program, 48000).unwrap();
        let mut out = vec![0i16; 48000 * 2];
        let (produced, more) = gen.run(&mut out, true);
        assert_eq!(produced, 48000 * 2);
        assert!(!more);
        let bound = (0.5 * 32767.0 * 1.01) as i16;
        assert!(out.iter().all(|&s| s.abs() <= bound));
    }

    #[test]
    fn event_split_applies_exactly_at_its_sample_offset() {
        let mut program = single_voice_program(440.0, 1.0, 400, 0.5);
        program.events.push(Event {
            wait_samples: 100,
            voice_id: None,
            operator_id: Some(0),
            voice: None,
            operator: Some(OperatorPayload {
                wave: None,
                attr: None,
                adjacency: None,
                silence: None,
                time: None,
                freq: None,
                dynfreq: None,
                phase: None,
                amp: Some(LineUpdate {
                    v0: Some(0.0),
                    vt: None,
                    end: None,
                    curve: None,
                    state_ratio: None,
                    goal_ratio: None,
                }),
                dynamp: None,
            }),
        });
        let mut gen = Generator::new(program, 48000).unwrap();
        let mut out = vec![0i16; 200 * 2];
        gen.run(&mut out, true);
        let before_silent = out[99 * 2] == 0 && out[99 * 2 + 1] == 0;
        let after_silent = out[150 * 2] == 0 && out[150 * 2 + 1] == 0;
        assert!(!before_silent);
        assert!(after_silent);
    }

    #[test]
    fn cycle_guard_terminates_and_silences_subtree() {
        let program = Program {
            voice_count: 1,
            operator_count: 2,
            events: vec![
                Event {
                    wait_samples: 0,
                    voice_id: Some(0),
                    operator_id: Some(0),
                    voice: Some(VoicePayload {
                        attr: Some(VoiceAttr { initialized: true, executing: true }),
                        pan: None,
                        graph: Some(vec![0]),
                        time: Some(OpTime::Finite(256)),
                    }),
                    operator: Some(OperatorPayload {
                        wave: Some(Wave::Sin),
                        attr: None,
                        adjacency: Some(Adjacency { fm: vec![], pm: vec![1], am: vec![] }),
                        silence: Some(0),
                        time: Some(OpTime::Finite(256)),
                        freq: Some(LineUpdate {
                            v0: Some(100.0),
                            vt: None,
                            end: None,
                            curve: None,
                            state_ratio: None,
                            goal_ratio: None,
                        }),
                        dynfreq: None,
                        phase: None,
                        amp: Some(LineUpdate {
                            v0: Some(1.0),
                            vt: None,
                            end: None,
                            curve: None,
                            state_ratio: None,
                            goal_ratio: None,
                        }),
                        dynamp: None,
                    }),
                },
                Event {
                    wait_samples: 0,
                    voice_id: None,
                    operator_id: Some(1),
                    voice: None,
                    operator: Some(OperatorPayload {
                        wave: Some(Wave::Sin),
                        attr: None,
                        adjacency: Some(Adjacency { fm: vec![], pm: vec![0], am: vec![] }),
                        silence: Some(0),
                        time: Some(OpTime::Infinite),
                        freq: Some(LineUpdate {
                            v0: Some(50.0),
                            vt: None,
                            end: None,
                            curve: None,
                            state_ratio: None,
                            goal_ratio: None,
                        }),
                        dynfreq: None,
                        phase: None,
                        amp: Some(LineUpdate {
                            v0: Some(1.0),
                            vt: None,
                            end: None,
                            curve: None,
                            state_ratio: None,
                            goal_ratio: None,
                        }),
                        dynamp: None,
                    }),
                },
            ],
            flags: ProgramFlags::default(),
            amp_scale: 1.0,
        };
        let mut gen = Generator::new(program, 48000).unwrap();
        let mut out = vec![0i16; 256 * 2];
        let (produced, _) = gen.run(&mut out, true);
        assert_eq!(produced, 256 * 2);
    }
}
