//! Properties of the AGC and the ducking path through the mixing bus

use onair_core::domain::agc::{AgcEngine, AgcSettings};
use onair_core::domain::audio::{Port, StreamConfig};
use onair_core::domain::config::EngineConfig;
use onair_core::domain::dsp::gain_to_db;
use onair_core::domain::mic::{MicMode, MicSettings};
use onair_core::domain::mixer::{MixMode, MixerSettings, MixingBus, PlayerRole};
use onair_tests::{peak, sine_at, Tone};
use proptest::prelude::*;

const SR: u32 = 44100;
const BLOCK: usize = 256;

fn limiting() -> AgcSettings {
    AgcSettings {
        limit_db: gain_to_db(0.707),
        ratio: 3.0,
        lookahead_sec: 0.01161,
        ..AgcSettings::default()
    }
}

fn ducking_mic() -> MicSettings {
    MicSettings {
        mode: MicMode::Processed,
        agc: AgcSettings {
            duck_enabled: true,
            ..limiting()
        },
        ..MicSettings::default()
    }
}

#[test]
fn test_agc_unit_input_converges_under_limit() {
    let mut agc = AgcEngine::new(SR, limiting());
    let step = agc.gain_interval_amount();
    let delay = agc.lookahead_frames();
    assert_eq!(delay, 512);

    for i in 0..2 * SR as usize {
        let out = agc.process(sine_at(i, 1000.0, SR, 1.0));
        if i >= delay {
            assert!(out.abs() <= 0.707 + step, "frame {i}: {out}");
        }
    }
    assert!((agc.gain() - 0.707).abs() < 0.01, "gain {}", agc.gain());
}

#[test]
fn test_open_mic_ducks_decks_on_stream_only_in_ducking_modes() {
    for (mode, ducks) in [(MixMode::Full, true), (MixMode::Simple, false)] {
        let stream = StreamConfig::new(SR, BLOCK).unwrap();
        let settings = MixerSettings {
            mode,
            ..MixerSettings::default()
        };
        let (mut bus, handle) = MixingBus::new(stream, &settings, &[ducking_mic()]);
        bus.attach_player(PlayerRole::Left, Box::new(Tone::new(500.0, 0.5, SR)))
            .unwrap();
        handle.set_mic_parameter(0, "open", "1").unwrap();

        let mut pos = 0;
        for _ in 0..300 {
            for s in bus.input_mut(Port::MicIn(0), 0).unwrap().iter_mut() {
                *s = sine_at(pos, 1000.0, SR, 1.0);
                pos += 1;
            }
            bus.process_block(BLOCK);
        }
        let factor = bus.ducking_factor();
        assert!((0.0..=1.0).contains(&factor));
        if ducks {
            assert!(factor < 0.5, "{mode:?}: ducking {factor}");
        } else {
            assert_eq!(factor, 1.0, "{mode:?}");
        }
    }
}

#[test]
fn test_factory_session_mics_report_levels() {
    let config = EngineConfig::factory_default();
    let (mut bus, handle) = MixingBus::new(
        config.stream_config().unwrap(),
        &config.mixer,
        &config.mic_settings(),
    );
    handle.set_mic_parameter(0, "open", "1").unwrap();
    let mut pos = 0;
    for _ in 0..200 {
        let n = bus.max_block();
        for s in bus.input_mut(Port::MicIn(0), 0).unwrap().iter_mut() {
            *s = sine_at(pos, 300.0, config.app.sample_rate, 0.5);
            pos += 1;
        }
        bus.process_block(n);
    }
    let stats = handle.stats();
    assert_eq!(stats.mics.len(), config.mics.len());
    assert!(stats.mics[0].open);
    assert!(stats.stream.peak_db > -20.0);
    assert!(peak(bus.output(Port::StreamOut, 0).unwrap()) > 0.05);
}

proptest! {
    #[test]
    fn prop_agc_gain_slews_by_at_most_one_interval(
        samples in prop::collection::vec(-2.0f32..2.0, 1..3000),
        ratio in 1.0f32..10.0,
    ) {
        let mut agc = AgcEngine::new(SR, AgcSettings { ratio, ..limiting() });
        let step = agc.gain_interval_amount();
        let mut previous = agc.gain();
        for s in samples {
            agc.process(s);
            let gain = agc.gain();
            prop_assert!((gain - previous).abs() <= step + 1e-6);
            previous = gain;
        }
    }

    #[test]
    fn prop_ducking_factor_stays_in_unit_range(
        frames in prop::collection::vec((-1.5f32..1.5, 0.0f32..1.0), 1..4000),
    ) {
        let mut agc = AgcEngine::new(SR, ducking_mic().agc);
        for (sample, open) in frames {
            agc.process_frame(sample, 0.0, open);
            let factor = agc.ducking_factor();
            prop_assert!((0.0..=1.0).contains(&factor), "factor {}", factor);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_bus_ducking_in_unit_range(
        amplitude in 0.0f32..2.0,
        blocks in 1usize..60,
        toggle_every in 1usize..20,
    ) {
        let stream = StreamConfig::new(SR, BLOCK).unwrap();
        let (mut bus, handle) =
            MixingBus::new(stream, &MixerSettings::default(), &[ducking_mic()]);
        let mut pos = 0;
        for b in 0..blocks {
            if b % toggle_every == 0 {
                let open = if (b / toggle_every) % 2 == 0 { "1" } else { "0" };
                handle.set_mic_parameter(0, "open", open).unwrap();
            }
            for s in bus.input_mut(Port::MicIn(0), 0).unwrap().iter_mut() {
                *s = sine_at(pos, 700.0, SR, amplitude);
                pos += 1;
            }
            bus.process_block(BLOCK);
            let factor = bus.ducking_factor();
            prop_assert!((0.0..=1.0).contains(&factor));
        }
    }
}
