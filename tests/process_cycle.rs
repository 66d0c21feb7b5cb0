use std::collections::HashMap;

use patchbay::TimeInfo;
use patchbay::port::identifier::{PortFlags, PortFlow, PortKind, PortOwner, PortUuid, TrackId};
use patchbay::port::{PortConnectionsManager, StereoPorts};
use patchbay::processor::{ProcessContext, TrackProcessor};
use patchbay::send::ChannelSend;
use patchbay::track::{Track, TrackKind};
use patchbay::transport::Transport;
use patchbay::{ClipSource, midi::MidiEventVec};

const BLOCK: usize = 8;

/// Captures the connect/disconnect debug logging per test.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

struct ToneClips(f32);

impl ClipSource for ToneClips {
    fn fill_audio(&mut self, time_nfo: &TimeInfo, left: &mut [f32], right: &mut [f32]) {
        let start = time_nfo.local_offset as usize;
        let end = start + time_nfo.nframes as usize;
        for i in start..end {
            left[i] = self.0;
            right[i] = self.0;
        }
    }

    fn fill_midi(&mut self, _time_nfo: &TimeInfo, _out: &mut MidiEventVec) {}
}

/// The external scheduler's job for one edge: move the producer's buffer
/// into the consumer's, scaled by the edge multiplier.
fn run_edge(mgr: &PortConnectionsManager, src: &[f32], src_id: PortUuid, dest: &mut [f32]) {
    for conn in mgr.connections() {
        if conn.src == src_id && conn.enabled {
            for (d, s) in dest.iter_mut().zip(src) {
                *d += s * conn.multiplier;
            }
        }
    }
}

#[test]
fn block_flows_from_track_through_send() {
    init_tracing();
    let mut mgr = PortConnectionsManager::new();
    let track = Track::new(TrackId(1), "Source", TrackKind::Audio);
    let mut tp = TrackProcessor::new(&track, BLOCK);
    let mut send = ChannelSend::new(track.id, 0, PortKind::Audio, BLOCK);

    // destination: another track's receivable input pair
    let fx_in = StereoPorts::new(
        PortFlow::Input,
        PortOwner::TrackProcessor(TrackId(2)),
        "FX in",
        "fx_in",
        PortFlags::empty(),
        BLOCK,
    );

    // track out feeds the send, the send feeds the FX track
    let (tp_out_l, tp_out_r) = {
        let out = tp.stereo_out.as_ref().unwrap();
        (out.l.uuid(), out.r.uuid())
    };
    let (send_in_l, send_in_r) = {
        let sin = send.stereo_in.as_ref().unwrap();
        (sin.l.uuid(), sin.r.uuid())
    };
    mgr.ensure_connect(tp_out_l, send_in_l, 1.0, true, true);
    mgr.ensure_connect(tp_out_r, send_in_r, 1.0, true, true);
    send.connect_stereo(&mut mgr, &fx_in.l, &fx_in.r, None)
        .unwrap();
    assert!(send.is_enabled(&mgr, None));
    send.set_amount(0.5);

    // one block, scheduler order: track processor, edge, send
    let transport = Transport::new();
    let time_nfo = TimeInfo::new(0, BLOCK as u32);
    tp.prepare_process();
    send.prepare_process();

    let mut clips = ToneClips(0.8);
    let mut ctx = ProcessContext {
        transport: &transport,
        clips: Some(&mut clips),
        editor_events: None,
        chords: None,
        recorder: None,
    };
    tp.process(&track, &time_nfo, &mut ctx);

    {
        let out = tp.stereo_out.as_ref().unwrap();
        let sin = send.stereo_in.as_mut().unwrap();
        run_edge(&mgr, &out.l.buf, tp_out_l, &mut sin.l.buf);
        run_edge(&mgr, &out.r.buf, tp_out_r, &mut sin.r.buf);
    }
    send.process_block(&time_nfo);

    let sent = send.stereo_out.as_ref().unwrap();
    for &sample in &sent.l.buf {
        assert!((sample - 0.4).abs() < 1e-6);
    }
}

#[test]
fn cycle_is_rejected_at_the_mutation_boundary() {
    init_tracing();
    let mut mgr = PortConnectionsManager::new();
    let track_a = Track::new(TrackId(1), "A", TrackKind::Audio);
    let track_b = Track::new(TrackId(2), "B", TrackKind::Audio);
    let tp_a = TrackProcessor::new(&track_a, BLOCK);
    let tp_b = TrackProcessor::new(&track_b, BLOCK);

    let mut owners: HashMap<PortUuid, PortOwner> = HashMap::new();
    for uuid in tp_a.port_uuids() {
        owners.insert(uuid, PortOwner::TrackProcessor(track_a.id));
    }
    for uuid in tp_b.port_uuids() {
        owners.insert(uuid, PortOwner::TrackProcessor(track_b.id));
    }
    let owner_of = |uuid: PortUuid| owners.get(&uuid).copied();

    let a_out = tp_a.stereo_out.as_ref().unwrap().l.uuid();
    let a_in = tp_a.stereo_in.as_ref().unwrap().l.uuid();
    let b_out = tp_b.stereo_out.as_ref().unwrap().l.uuid();
    let b_in = tp_b.stereo_in.as_ref().unwrap().l.uuid();

    assert!(!mgr.would_create_cycle(a_out, b_in, owner_of));
    mgr.ensure_connect(a_out, b_in, 1.0, false, true);

    // feeding B back into A would close the loop
    assert!(mgr.would_create_cycle(b_out, a_in, owner_of));

    // tearing the unit down clears its edges
    tp_a.disconnect_all_ports(&mut mgr);
    assert!(mgr.is_empty());
    assert!(!mgr.would_create_cycle(b_out, a_in, owner_of));
}
