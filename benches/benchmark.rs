use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sauscript_synth::generator::Generator;
use sauscript_synth::line::LineUpdate;
use sauscript_synth::program::{Adjacency, Event, OpTime, OperatorPayload, Program, ProgramFlags, VoiceAttr, VoicePayload};
use sauscript_synth::wavetable::Wave;

fn line(v0: f32) -> LineUpdate {
    LineUpdate {
        v0: Some(v0),
        vt: None,
        end: None,
        curve: None,
        state_ratio: None,
        goal_ratio: None,
    }
}

/// An FM pair: one carrier modulated in frequency by one operator, run
/// for one second of 48kHz stereo audio.
fn fm_pair_program(srate: u32) -> Program {
    Program {
        voice_count: 1,
        operator_count: 2,
        events: vec![
            Event {
                wait_samples: 0,
                voice_id: Some(0),
                operator_id: Some(0),
                voice: Some(VoicePayload {
                    attr: Some(VoiceAttr {
                        initialized: true,
                        executing: true,
                    }),
                    pan: Some(line(0.5)),
                    graph: Some(vec![0]),
                    time: Some(OpTime::Finite(srate)),
                }),
                operator: Some(OperatorPayload {
                    wave: Some(Wave::Sin),
                    attr: None,
                    adjacency: Some(Adjacency {
                        fm: vec![1],
                        pm: vec![],
                        am: vec![],
                    }),
                    silence: Some(0),
                    time: Some(OpTime::Finite(srate)),
                    freq: Some(line(220.0)),
                    dynfreq: Some(400.0),
                    phase: None,
                    amp: Some(line(0.8)),
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
                    adjacency: Some(Adjacency::default()),
                    silence: Some(0),
                    time: Some(OpTime::Infinite),
                    freq: Some(line(3.0)),
                    dynfreq: None,
                    phase: None,
                    amp: Some(line(1.0)),
                    dynamp: None,
                }),
            },
        ],
        flags: ProgramFlags::default(),
        amp_scale: 1.0,
    }
}

fn render_one_second(srate: u32) -> usize {
    let program = fm_pair_program(srate);
    let mut generator = Generator::new(program, srate).unwrap();
    let mut out = vec![0i16; srate as usize * 2];
    let (produced, _) = generator.run(&mut out, true);
    produced
}

fn fm_pair_bench(c: &mut Criterion) {
    c.bench_function("fm_pair_one_second_48k", |b| {
        b.iter(|| black_box(render_one_second(48000)));
    });
}

criterion_group!(benches, fm_pair_bench);
criterion_main!(benches);
