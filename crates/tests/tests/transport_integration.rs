//! Player transports driven through a mixer session
//!
//! These tests run the real decode threads and pull audio the way the host
//! callback does, so they wait for decoders before reading.

use onair_core::domain::audio::Port;
use onair_core::domain::config::EngineConfig;
use onair_core::domain::mixer::PlayerRole;
use onair_infra::audio::{
    DecoderRegistry, FadeMode, MixerSession, PlayRequest, PlayerTransport, TransportError,
    TransportState,
};
use onair_tests::{peak, pull_left, rising_crossings, wait_decoded, wait_for};
use std::sync::Arc;

const SR: u32 = 44100;
const BLOCK: usize = 512;

fn session() -> MixerSession {
    let mut config = EngineConfig::factory_default();
    config.app.sample_rate = SR;
    config.app.max_block = BLOCK;
    config.app.player_buffer_seconds = 4.0;
    config.mixer.effect_slots = 1;
    MixerSession::init(&config, DecoderRegistry::with_builtin()).unwrap()
}

/// Run the bus for `blocks` periods and return the stream's left channel
fn render(session: &mut MixerSession, blocks: usize) -> Vec<f32> {
    let bus = session.bus_mut().unwrap();
    let mut out = Vec::with_capacity(blocks * BLOCK);
    for _ in 0..blocks {
        let n = bus.process_block(BLOCK);
        out.extend_from_slice(&bus.output(Port::StreamOut, 0).unwrap()[..n]);
    }
    out
}

#[test]
fn test_silence_source_ids_and_zeros_after_fade() {
    let mut session = session();
    let left = session.player(PlayerRole::Left).unwrap();

    let id = left
        .play(PlayRequest::new("signal:silence?seconds=30").seek(0.0))
        .unwrap();
    assert_eq!(id % 2, 1);
    assert_eq!(left.state(), TransportState::Playing);
    assert!(left.stats().playing);

    let id = left.eject().unwrap();
    assert_eq!(id % 2, 0);
    assert_eq!(left.state(), TransportState::Stopped);

    let out = render(&mut session, 40);
    assert!(out.iter().all(|&s| s == 0.0));
    session.shutdown().unwrap();
}

#[test]
fn test_eject_fades_out_through_the_bus() {
    let mut session = session();
    let left = session.player(PlayerRole::Left).unwrap();
    left.set_fade_mode(FadeMode::Short);
    left.play(PlayRequest::new("signal:sine?freq=1000&seconds=60&amp=0.5"))
        .unwrap();
    wait_decoded(left, 0.0, 3.0);

    let before = render(&mut session, 20);
    assert!(peak(&before[BLOCK..]) > 0.4);

    let left = session.player(PlayerRole::Left).unwrap();
    left.eject().unwrap();
    // fade length is clamped to the four second buffer
    let fading = render(&mut session, 4 * SR as usize / BLOCK + 20);
    assert!(peak(&fading[..BLOCK]) > 0.3);
    let tail = &fading[fading.len() - 10 * BLOCK..];
    assert_eq!(peak(tail), 0.0);
    for w in fading.chunks(SR as usize / 4).collect::<Vec<_>>().windows(2) {
        assert!(peak(w[1]) <= peak(w[0]) + 1e-3);
    }
    session.shutdown().unwrap();
}

#[test]
fn test_two_ejects_never_replay_first_fade() {
    let registry = Arc::new(DecoderRegistry::with_builtin());
    let (player, mut reader) = PlayerTransport::create("reentrant", 8000, 1.0, registry).unwrap();
    player.set_fade_mode(FadeMode::Long);

    player
        .play(PlayRequest::new("signal:sine?freq=200&seconds=60&amp=0.9"))
        .unwrap();
    wait_decoded(&player, 0.0, 0.5);
    pull_left(&mut reader, 128, 64);
    player.eject().unwrap();
    pull_left(&mut reader, 128, 64);

    let decoded = player.stats().decoded_seconds;
    player
        .play(PlayRequest::new("signal:sine?freq=200&seconds=60&amp=0.2"))
        .unwrap();
    wait_decoded(&player, decoded, 0.5);
    player.eject().unwrap();

    let after = pull_left(&mut reader, 16000, 64);
    assert!(peak(&after) > 0.1);
    assert!(peak(&after) <= 0.2 + 1e-3, "replayed {}", peak(&after));
}

#[test]
fn test_decode_side_rate_conversion_keeps_pitch() {
    let registry = Arc::new(DecoderRegistry::with_builtin());
    let (player, mut reader) = PlayerTransport::create("src", SR, 3.0, registry).unwrap();
    player
        .play(PlayRequest::new(
            "signal:sine?freq=441&seconds=2.5&amp=0.5&rate=22050",
        ))
        .unwrap();
    wait_decoded(&player, 0.0, 2.0);

    let out = pull_left(&mut reader, 2 * SR as usize, BLOCK);
    let second = &out[SR as usize..];
    let crossings = rising_crossings(second) as i64;
    assert!((crossings - 441).abs() <= 3, "{crossings} cycles");
    assert!((peak(second) - 0.5).abs() < 0.03);
}

#[test]
fn test_crossfader_selects_deck() {
    let mut session = session();
    let left = session.player(PlayerRole::Left).unwrap();
    left.play(PlayRequest::new("signal:sine?freq=1000&seconds=60&amp=0.4"))
        .unwrap();
    wait_decoded(left, 0.0, 3.0);

    session.handle().set_crossfade(1.0);
    let right_side = render(&mut session, 60);
    assert!(peak(&right_side[right_side.len() - BLOCK..]) < 1e-3);

    session.handle().set_crossfade(0.0);
    let left_side = render(&mut session, 60);
    assert!(peak(&left_side[left_side.len() - BLOCK..]) > 0.3);
    session.shutdown().unwrap();
}

#[test]
fn test_playlist_ids_through_session() {
    let session = session();
    let interlude = session.player(PlayerRole::Interlude).unwrap();
    let item = PlayRequest::new("signal:silence?seconds=0.1");
    let id = interlude
        .play_many(
            vec![item.clone(), PlayRequest::new("nothing.mp3"), item],
            false,
        )
        .unwrap();
    assert_eq!(id, 1);
    wait_for(|| interlude.context_id() == 4);

    let err = interlude
        .play(PlayRequest::new("signal:unknown"))
        .unwrap_err();
    assert!(matches!(err, TransportError::NoDecoder(_)));
    assert_eq!(interlude.state(), TransportState::Stopped);
    session.shutdown().unwrap();
}

#[test]
fn test_session_stats_serialize() {
    let session = session();
    session
        .player(PlayerRole::Effect(0))
        .unwrap()
        .play(PlayRequest::new("signal:silence").context_hint(40))
        .unwrap();

    let stats = session.stats();
    assert_eq!(stats.players.len(), 4);
    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["players"][3][1]["context_id"], 41);
    assert_eq!(json["players"][3][1]["state"], "playing");
    assert!(json["mixer"]["mics"].is_array());
    session.shutdown().unwrap();
}
