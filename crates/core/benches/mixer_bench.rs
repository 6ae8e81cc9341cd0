// Performance benchmarks for the AGC and the mixing bus
//
// Run with: cargo bench --bench mixer_bench

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use onair_core::domain::agc::{AgcEngine, AgcSettings};
use onair_core::domain::audio::{BlockSource, Port, StreamConfig};
use onair_core::domain::mic::{MicMode, MicSettings};
use onair_core::domain::mixer::{MixMode, MixerSettings, MixingBus, PlayerRole};

struct Tone {
    phase: f32,
    step: f32,
}

impl BlockSource for Tone {
    fn read_block(&mut self, left: &mut [f32], right: &mut [f32]) -> usize {
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let s = 0.5 * self.phase.sin();
            *l = s;
            *r = s;
            self.phase = (self.phase + self.step) % std::f32::consts::TAU;
        }
        left.len()
    }
}

fn tone() -> Box<dyn BlockSource> {
    Box::new(Tone {
        phase: 0.0,
        step: std::f32::consts::TAU * 440.0 / 44100.0,
    })
}

fn bench_agc(c: &mut Criterion) {
    let mut group = c.benchmark_group("agc_1024_samples");
    let input: Vec<f32> = (0..1024).map(|i| (i as f32 * 0.0627).sin() * 0.8).collect();

    for (name, settings) in [
        ("default", AgcSettings::default()),
        (
            "full_chain",
            AgcSettings {
                duck_enabled: true,
                phase_rotate: true,
                hf_multiplier: 2.0,
                lf_multiplier: 2.0,
                hp_stages: 4,
                ..AgcSettings::default()
            },
        ),
    ] {
        let mut agc = AgcEngine::new(44100, settings);
        group.bench_with_input(BenchmarkId::from_parameter(name), &input, |b, input| {
            b.iter(|| {
                for &x in input {
                    black_box(agc.process(black_box(x)));
                }
            });
        });
    }

    group.finish();
}

fn bench_mixing_bus(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixing_bus_512_frames");
    let config = StreamConfig::new(44100, 512).unwrap();
    let mic = MicSettings {
        mode: MicMode::Processed,
        ..MicSettings::default()
    };

    for mode in [MixMode::Simple, MixMode::Full, MixMode::PrivateCallMicOpen] {
        for mics in [0usize, 2, 4] {
            let settings = MixerSettings {
                mode,
                ..MixerSettings::default()
            };
            let (mut bus, handle) = MixingBus::new(config, &settings, &vec![mic; mics]);
            for role in [PlayerRole::Left, PlayerRole::Right, PlayerRole::Interlude] {
                bus.attach_player(role, tone()).unwrap();
            }
            for unit in 0..mics {
                handle.set_mic_parameter(unit, "open", "1").unwrap();
                if let Some(buf) = bus.input_mut(Port::MicIn(unit), 0) {
                    buf.iter_mut()
                        .enumerate()
                        .for_each(|(i, s)| *s = (i as f32 * 0.05).sin() * 0.3);
                }
            }

            group.bench_with_input(
                BenchmarkId::new(format!("{mode:?}"), mics),
                &mics,
                |b, _| {
                    b.iter(|| black_box(bus.process_block(black_box(512))));
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_agc, bench_mixing_bus);
criterion_main!(benches);
