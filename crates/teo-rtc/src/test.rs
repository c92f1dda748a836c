use crate::*;
use teo_signal::{
    MemRelay, MemRelayClient, MemRelayRecv, RelayTransport, SignalDesc,
    SignalEnvelope,
};

const TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

fn init_tracing() {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::from_default_env(),
        )
        .with_file(true)
        .with_line_number(true)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

async fn wait_until<F: FnMut() -> bool>(mut f: F) {
    tokio::time::timeout(TIMEOUT, async move {
        while !f() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

async fn recv_signal<F: Fn(&SignalPayload) -> bool>(
    recv: &mut MemRelayRecv,
    f: F,
) -> SignalPayload {
    tokio::time::timeout(TIMEOUT, async move {
        loop {
            let frame = recv.recv().await.expect("relay closed");
            if let Ok(payload) = frame.signal_payload() {
                if frame.is_signal() && f(&payload) {
                    return payload;
                }
            }
        }
    })
    .await
    .expect("signal not received in time")
}

fn envelope(to: &str, payload: SignalPayload) -> String {
    SignalEnvelope::new(to.into(), payload).encode().unwrap()
}

fn is_offer(p: &SignalPayload) -> bool {
    matches!(
        p,
        SignalPayload::Desc {
            desc: SignalDesc::Offer { .. }
        }
    )
}

fn is_answer(p: &SignalPayload) -> bool {
    matches!(
        p,
        SignalPayload::Desc {
            desc: SignalDesc::Answer { .. }
        }
    )
}

fn is_start(p: &SignalPayload) -> bool {
    *p == SignalPayload::start()
}

fn is_reset(p: &SignalPayload) -> bool {
    *p == SignalPayload::reset()
}

type CallLog = Arc<Mutex<Vec<(PeerId, Option<MediaStream>)>>>;

struct TestPeer {
    rtc: TeoRtc,
    client: Arc<MemRelayClient>,
    factory: Arc<MemFactory>,
    app_recv: tokio::sync::mpsc::UnboundedReceiver<RelayFrame>,
    _relay: Arc<MemRelay>,
    _driver: AbortTask<()>,
}

impl TestPeer {
    fn new(net: &Arc<MemNet>, relay: &Arc<MemRelay>, name: &str) -> Self {
        let (client, mut recv) = relay.connect(name).unwrap();
        let factory = net.factory(name);
        let rtc =
            TeoRtc::new(RtcConfig::default(), factory.clone(), client.clone());

        let (app_send, app_recv) = tokio::sync::mpsc::unbounded_channel();
        let driver_rtc = rtc.clone();
        let driver = AbortTask::spawn(async move {
            while let Some(frame) = recv.recv().await {
                if let Some(frame) = driver_rtc.on_relay_frame(frame) {
                    let _ = app_send.send(frame);
                }
            }
        });

        Self {
            rtc,
            client,
            factory,
            app_recv,
            _relay: relay.clone(),
            _driver: driver,
        }
    }

    async fn next_app(&mut self) -> RelayFrame {
        tokio::time::timeout(TIMEOUT, self.app_recv.recv())
            .await
            .expect("no app frame in time")
            .expect("driver ended")
    }

    fn has_record(&self, peer_id: &str) -> bool {
        self.rtc.get_webrtc_map().contains_key(peer_id)
    }

    fn call_log(&self) -> CallLog {
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let log2 = log.clone();
        self.rtc.register_call_answer(move |peer_id, stream| {
            log2.lock().unwrap().push((peer_id.clone(), stream));
        });
        log
    }
}

async fn connected_pair() -> (TestPeer, TestPeer) {
    let net = MemNet::new();
    let relay = MemRelay::new();
    let a = TestPeer::new(&net, &relay, "A");
    let mut b = TestPeer::new(&net, &relay, "B");

    assert!(a.rtc.send(&serde_json::json!({"to": "B", "msg": "hello"})));
    let frame = b.next_app().await;
    assert_eq!("hello", frame.extra["msg"]);

    wait_until(|| a.rtc.is_connected("B") && b.rtc.is_connected("A")).await;

    (a, b)
}

#[tokio::test(flavor = "multi_thread")]
async fn first_send_relays_and_starts_once() {
    init_tracing();

    let net = MemNet::new();
    let relay = MemRelay::new();
    let a = TestPeer::new(&net, &relay, "A");
    let (_b_client, mut b_recv) = relay.connect("B").unwrap();

    let msg = serde_json::json!({"to": "B", "msg": "hi"});
    assert!(a.rtc.send(&msg));
    assert!(a.rtc.send(&msg));
    assert!(a.rtc.send_str(r#"{"to":"B","msg":"hi"}"#));

    // every message went out over the relay unmodified
    let app = a.client.sent_app_frames();
    assert_eq!(3, app.len());
    assert!(app.iter().all(|f| f.from.is_none() && f.extra["msg"] == "hi"));

    // exactly one negotiation
    assert_eq!(1, a.factory.created_count("B"));
    let starts = a
        .client
        .sent_signals()
        .into_iter()
        .filter(|(to, p)| to == "B" && is_start(p))
        .count();
    assert_eq!(1, starts);

    let map = a.rtc.get_webrtc_map();
    assert_eq!(Role::Initiator, map["B"].role);
    assert_eq!(PeerState::Negotiating, map["B"].state);

    // start, then the app message, then after the debounce an offer
    let first = b_recv.recv().await.unwrap();
    assert!(is_start(&first.signal_payload().unwrap()));
    assert_eq!(Some("A".into()), first.from);
    let second = b_recv.recv().await.unwrap();
    assert_eq!("hi", second.extra["msg"]);
    recv_signal(&mut b_recv, is_offer).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_offer_creates_responder_and_answers() {
    init_tracing();

    let net = MemNet::new();
    let relay = MemRelay::new();
    let b = TestPeer::new(&net, &relay, "B");
    let (a_client, mut a_recv) = relay.connect("A").unwrap();

    let fa = net.factory("A");
    let cfg = RtcConfig::default();
    let (a_conn, _a_evt) = fa.new_connection(&"B".into(), &cfg).unwrap();
    let (_a_chan, _a_chan_evt) = a_conn
        .create_data_channel(&cfg.channel_label, &cfg.data_channel_init())
        .unwrap();
    let offer = a_conn.create_offer().await.unwrap();
    a_conn.set_local_description(offer.clone()).await.unwrap();

    assert!(a_client.send(&envelope("B", SignalPayload::desc(offer))));

    let answer = match recv_signal(&mut a_recv, is_answer).await {
        SignalPayload::Desc { desc } => desc.session().unwrap(),
        _ => unreachable!(),
    };

    let map = b.rtc.get_webrtc_map();
    assert_eq!(Role::Responder, map["A"].role);
    assert_eq!(1, b.factory.created_count("A"));

    // completing the exchange opens the channel on the responder
    a_conn.set_remote_description(answer).await.unwrap();
    wait_until(|| b.rtc.is_connected("A")).await;
    assert_eq!(PeerState::Connected, b.rtc.get_webrtc_map()["A"].state);
}

#[tokio::test(flavor = "multi_thread")]
async fn direct_channel_carries_later_messages() {
    init_tracing();

    let (a, mut b) = connected_pair().await;
    a.client.clear_sent();

    assert!(a.rtc.send(&serde_json::json!({"to": "B", "msg": "direct"})));
    let frame = b.next_app().await;
    assert_eq!("direct", frame.extra["msg"]);
    assert_eq!(Some("A".into()), frame.from);

    // nothing went through the relay
    assert!(a.client.sent().is_empty());

    // and the other way around
    let mut a = a;
    assert!(b.rtc.send(&serde_json::json!({"to": "A", "n": 2})));
    let frame = a.next_app().await;
    assert_eq!(2, frame.extra["n"]);
    assert_eq!(Some("B".into()), frame.from);
}

#[tokio::test(flavor = "multi_thread")]
async fn simultaneous_first_sends_converge() {
    init_tracing();

    let net = MemNet::new();
    let relay = MemRelay::new();
    let mut a = TestPeer::new(&net, &relay, "A");
    let mut b = TestPeer::new(&net, &relay, "B");

    assert!(a.rtc.send(&serde_json::json!({"to": "B", "msg": "from a"})));
    assert!(b.rtc.send(&serde_json::json!({"to": "A", "msg": "from b"})));

    assert_eq!("from a", b.next_app().await.extra["msg"]);
    assert_eq!("from b", a.next_app().await.extra["msg"]);

    wait_until(|| a.rtc.is_connected("B") && b.rtc.is_connected("A")).await;

    let a_role = a.rtc.get_webrtc_map()["B"].role;
    let b_role = b.rtc.get_webrtc_map()["A"].role;
    assert_ne!(a_role, b_role);
}

#[tokio::test(flavor = "multi_thread")]
async fn self_and_undirected_sends_do_not_negotiate() {
    init_tracing();

    let net = MemNet::new();
    let relay = MemRelay::new();
    let a = TestPeer::new(&net, &relay, "A");

    a.rtc.send(&serde_json::json!({"to": "A", "msg": "me"}));
    a.rtc.send(&serde_json::json!({"msg": "nobody"}));
    assert!(!a.rtc.send_str("not json"));

    assert!(a.rtc.get_webrtc_map().is_empty());
    assert_eq!(0, a.factory.created_count("A"));
    assert!(a.client.sent_signals().is_empty());

    // signal frames without a sender are dropped
    let frame = RelayFrame {
        cmd: teo_signal::CMD_SIGNAL,
        from: None,
        to: Some("A".into()),
        data: serde_json::json!({"desc": {"type": "teocli-start"}}),
        extra: Default::default(),
    };
    assert!(!a.rtc.on_signal(&frame));
    assert!(a.rtc.on_relay_frame(frame).is_none());
    assert!(a.rtc.get_webrtc_map().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_answer_resets_then_reset_symmetry() {
    init_tracing();

    let net = MemNet::new();
    let relay = MemRelay::new();
    let b = TestPeer::new(&net, &relay, "B");
    let (a_client, mut a_recv) = relay.connect("A").unwrap();

    a_client.send(&envelope("B", SignalPayload::start()));
    wait_until(|| b.has_record("A")).await;
    let first = b.rtc.get_webrtc_map()["A"].clone();
    assert_eq!(Role::Responder, first.role);

    let fa = net.factory("A");
    let cfg = RtcConfig::default();
    let (a_conn, _a_evt) = fa.new_connection(&"B".into(), &cfg).unwrap();
    let (_a_chan, _a_chan_evt) = a_conn
        .create_data_channel(&cfg.channel_label, &cfg.data_channel_init())
        .unwrap();
    let offer = a_conn.create_offer().await.unwrap();
    a_conn.set_local_description(offer.clone()).await.unwrap();

    // the responder fails to answer: it resets and forgets the peer
    b.factory
        .connection("A")
        .unwrap()
        .fail_next(MemOp::CreateAnswer);
    a_client.send(&envelope("B", SignalPayload::desc(offer.clone())));
    recv_signal(&mut a_recv, is_reset).await;
    wait_until(|| !b.has_record("A")).await;
    wait_until(|| b.factory.connection("A").is_none()).await;

    // the next non-reset signal builds a fresh responder record
    a_client.send(&envelope("B", SignalPayload::desc(offer)));
    recv_signal(&mut a_recv, is_answer).await;
    let second = b.rtc.get_webrtc_map()["A"].clone();
    assert_eq!(Role::Responder, second.role);
    assert_ne!(first.uniq, second.uniq);

    // a reset from the remote destroys it again
    a_client.send(&envelope("B", SignalPayload::reset()));
    wait_until(|| !b.has_record("A")).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn start_replaces_existing_record() {
    init_tracing();

    let (_a, b) = connected_pair().await;
    let before = b.rtc.get_webrtc_map()["A"].uniq;
    let log = b.call_log();

    // the remote restarted, a start marker tears down what we had
    let (intruder, _recv) = {
        let relay = b._relay.clone();
        relay.disconnect("A");
        relay.connect("A").unwrap()
    };
    intruder.send(&envelope("B", SignalPayload::start()));

    wait_until(|| {
        b.rtc
            .get_webrtc_map()
            .get("A")
            .map(|s| s.uniq != before && s.role == Role::Responder)
            .unwrap_or(false)
    })
    .await;
    assert!(!b.rtc.is_connected("A"));
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn renegotiation_requests_are_coalesced() {
    init_tracing();

    let (a, _b) = connected_pair().await;
    a.client.clear_sent();

    let offers = || {
        a.client
            .sent_signals()
            .into_iter()
            .filter(|(_, p)| is_offer(p))
            .count()
    };

    let mem = a.factory.connection("B").unwrap();
    for _ in 0..5 {
        mem.emit(PeerConnectionEvent::NegotiationNeeded);
    }

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    assert_eq!(1, offers());

    mem.emit(PeerConnectionEvent::NegotiationNeeded);
    wait_until(|| offers() == 2).await;
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(2, offers());
    assert!(a.rtc.is_connected("B"));
}

#[tokio::test(flavor = "multi_thread")]
async fn one_disconnect_after_track_is_suppressed() {
    init_tracing();

    let (_a, b) = connected_pair().await;
    let log = b.call_log();
    let mem = b.factory.connection("A").unwrap();

    mem.emit(PeerConnectionEvent::Track(MediaStream {
        id: "s".into(),
        tracks: vec![MediaTrack::video("cam")],
    }));
    mem.set_ice_state(IceConnectionState::Disconnected);

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert!(b.rtc.is_connected("A"));
    assert_eq!(1, log.lock().unwrap().len());
    assert!(log.lock().unwrap()[0].1.is_some());

    // suppression was used up
    mem.set_ice_state(IceConnectionState::Disconnected);
    wait_until(|| !b.has_record("A")).await;
    wait_until(|| log.lock().unwrap().len() == 2).await;
    let (peer_id, stream) = log.lock().unwrap()[1].clone();
    assert_eq!("A", &*peer_id);
    assert!(stream.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn ice_failure_always_tears_down() {
    init_tracing();

    let (a, b) = connected_pair().await;
    let mem = b.factory.connection("A").unwrap();

    mem.emit(PeerConnectionEvent::Track(MediaStream {
        id: "s".into(),
        tracks: vec![MediaTrack::audio("mic")],
    }));
    mem.set_ice_state(IceConnectionState::Failed);

    wait_until(|| !b.has_record("A")).await;
    assert!(mem.is_closed());

    // the remote end sees its channel close
    wait_until(|| !a.has_record("B")).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn channel_close_ends_call() {
    init_tracing();

    let (a, b) = connected_pair().await;
    let log = a.call_log();

    let chan = a
        .rtc
        .signal_channel()
        .registry()
        .lock()
        .unwrap()
        .get_channel("B")
        .unwrap();
    chan.close();

    wait_until(|| !a.has_record("B") && !b.has_record("A")).await;
    wait_until(|| !log.lock().unwrap().is_empty()).await;
    let log = log.lock().unwrap().clone();
    assert_eq!(1, log.len());
    assert_eq!("B", &*log[0].0);
    assert!(log[0].1.is_none());

    // the next send falls back to the relay and negotiates again
    a.client.clear_sent();
    assert!(a.rtc.send(&serde_json::json!({"to": "B"})));
    assert_eq!(1, a.client.sent_app_frames().len());
    wait_until(|| a.rtc.is_connected("B") && b.rtc.is_connected("A")).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn call_and_hangup() {
    init_tracing();

    let (a, b) = connected_pair().await;
    let a_log = a.call_log();
    let b_log = b.call_log();

    let a_media = MediaStream {
        id: "a-stream".into(),
        tracks: vec![MediaTrack::audio("a-mic"), MediaTrack::video("a-cam")],
    };
    let b_media = MediaStream {
        id: "b-stream".into(),
        tracks: vec![MediaTrack::audio("b-mic")],
    };
    let audio = CallOptions {
        audio: true,
        ..Default::default()
    };

    assert!(!a.rtc.call(&"B".into(), Some(&a_media), CallOptions::default()));
    assert!(!a.rtc.call(&"Z".into(), Some(&a_media), audio));

    assert!(a.rtc.call(&"B".into(), Some(&a_media), audio));
    let a_mem = a.factory.connection("B").unwrap();
    assert_eq!(vec![MediaTrack::audio("a-mic")], a_mem.local_tracks());

    wait_until(|| !b_log.lock().unwrap().is_empty()).await;
    {
        let log = b_log.lock().unwrap();
        let stream = log[0].1.clone().unwrap();
        assert_eq!("A", &*log[0].0);
        assert_eq!("a-stream", stream.id);
        assert_eq!(vec![MediaTrack::audio("a-mic")], stream.tracks);
    }
    assert_eq!(true, b.rtc.get_webrtc_map()["A"].metadata["call"]["audio"]);

    // answer with our own audio
    assert!(b.rtc.call(&"A".into(), Some(&b_media), audio));
    wait_until(|| !a_log.lock().unwrap().is_empty()).await;
    assert_eq!(
        "b-stream",
        a_log.lock().unwrap()[0].1.as_ref().unwrap().id
    );

    // hanging up on one end removes the tracks on the other end too
    let b_mem = b.factory.connection("A").unwrap();
    assert!(a.rtc.hangup(&"B".into()));
    assert!(a_mem.local_tracks().is_empty());
    wait_until(|| b_mem.local_tracks().is_empty()).await;
    wait_until(|| {
        b_log.lock().unwrap().last().map(|(_, s)| s.is_none()) == Some(true)
    })
    .await;
    wait_until(|| {
        a_log.lock().unwrap().last().map(|(_, s)| s.is_none()) == Some(true)
    })
    .await;

    // the data channel survives the call
    assert!(a.rtc.is_connected("B"));
    assert!(b.rtc.is_connected("A"));

    b.rtc.unregister_call_answer();
    assert!(!b.rtc.hangup(&"Z".into()));
}

#[tokio::test(flavor = "multi_thread")]
async fn relay_close_drops_every_peer() {
    init_tracing();

    let (a, b) = connected_pair().await;
    let a_log = a.call_log();
    let b_log = b.call_log();

    a.rtc.on_open();
    a.rtc.on_error(&Error::id("Test"));
    assert!(a.rtc.is_connected("B"));

    a.rtc.on_close();
    assert!(a.rtc.get_webrtc_map().is_empty());
    assert!(a.factory.connection("B").map(|c| c.is_closed()).unwrap_or(true));

    // the call is over on both ends
    {
        let log = a_log.lock().unwrap();
        assert_eq!(1, log.len());
        assert_eq!("B", &*log[0].0);
        assert!(log[0].1.is_none());
    }
    wait_until(|| !b.has_record("A")).await;
    wait_until(|| b_log.lock().unwrap().len() == 1).await;
    assert!(b_log.lock().unwrap()[0].1.is_none());

    // closing an empty overlay again reports nothing new
    a.rtc.on_close();
    assert_eq!(1, a_log.lock().unwrap().len());
}

#[tokio::test(flavor = "multi_thread")]
async fn disconnect_closes_both_ends() {
    init_tracing();

    let (a, b) = connected_pair().await;
    let a_log = a.call_log();
    let b_log = b.call_log();
    let b_mem = b.factory.connection("A").unwrap();

    assert!(b.rtc.disconnect("A"));
    assert!(!b.rtc.disconnect("A"));
    assert!(b_mem.is_closed());
    {
        let log = b_log.lock().unwrap();
        assert_eq!(1, log.len());
        assert_eq!("A", &*log[0].0);
        assert!(log[0].1.is_none());
    }

    wait_until(|| !a.has_record("B")).await;
    wait_until(|| a_log.lock().unwrap().len() == 1).await;
    assert!(a_log.lock().unwrap()[0].1.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn dropping_overlay_closes_connections() {
    init_tracing();

    let (a, b) = connected_pair().await;
    let a_mem = a.factory.connection("B").unwrap();

    drop(a);
    wait_until(|| a_mem.is_closed()).await;
    wait_until(|| !b.has_record("A")).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn initiator_offer_failures_reset() {
    init_tracing();

    for op in [MemOp::CreateOffer, MemOp::SetLocalDescription] {
        let net = MemNet::new();
        let relay = MemRelay::new();
        let a = TestPeer::new(&net, &relay, "A");
        let (_b_client, mut b_recv) = relay.connect("B").unwrap();

        // the offer is only built once the debounce window passes
        assert!(a.rtc.send(&serde_json::json!({"to": "B"})));
        a.factory.connection("B").unwrap().fail_next(op);

        recv_signal(&mut b_recv, is_reset).await;
        wait_until(|| !a.has_record("B")).await;
        assert!(
            !a.client.sent_signals().iter().any(|(_, p)| is_offer(p)),
            "{op:?}",
        );
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_answer_resets_both_sides() {
    init_tracing();

    let net = MemNet::new();
    let relay = MemRelay::new();
    let a = TestPeer::new(&net, &relay, "A");
    let b = TestPeer::new(&net, &relay, "B");

    assert!(a.rtc.send(&serde_json::json!({"to": "B"})));
    a.factory
        .connection("B")
        .unwrap()
        .fail_next(MemOp::SetRemoteDescription);

    wait_until(|| {
        a.client
            .sent_signals()
            .iter()
            .any(|(to, p)| to == "B" && is_reset(p))
    })
    .await;
    assert!(b
        .client
        .sent_signals()
        .iter()
        .any(|(to, p)| to == "A" && is_answer(p)));

    wait_until(|| !a.rtc.is_connected("B") && !b.has_record("A")).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_candidate_resets_responder() {
    init_tracing();

    let net = MemNet::new();
    let relay = MemRelay::new();
    let a = TestPeer::new(&net, &relay, "A");
    let b = TestPeer::new(&net, &relay, "B");

    assert!(a.rtc.send(&serde_json::json!({"to": "B"})));
    wait_until(|| b.has_record("A")).await;
    b.factory
        .connection("A")
        .unwrap()
        .fail_next(MemOp::AddIceCandidate);

    wait_until(|| {
        b.client
            .sent_signals()
            .iter()
            .any(|(to, p)| to == "A" && is_reset(p))
    })
    .await;
    wait_until(|| !b.rtc.is_connected("A") && !a.rtc.is_connected("B"))
        .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn candidates_behind_an_offer_are_applied() {
    init_tracing();

    let net = MemNet::new();
    let relay = MemRelay::new();
    let b = TestPeer::new(&net, &relay, "B");
    let (a_client, mut a_recv) = relay.connect("A").unwrap();

    let fa = net.factory("A");
    let cfg = RtcConfig::default();
    let (a_conn, _a_evt) = fa.new_connection(&"B".into(), &cfg).unwrap();
    let (_a_chan, _a_chan_evt) = a_conn
        .create_data_channel(&cfg.channel_label, &cfg.data_channel_init())
        .unwrap();
    let offer = a_conn.create_offer().await.unwrap();
    a_conn.set_local_description(offer.clone()).await.unwrap();

    // the whole burst lands while the answer is still being built
    assert!(a_client.send(&envelope("B", SignalPayload::desc(offer))));
    for i in 0..3 {
        let candidate = IceCandidate {
            candidate: format!("candidate:{i} 1 udp 1 127.0.0.1 {} typ host", 5000 + i),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
            username_fragment: None,
        };
        assert!(a_client
            .send(&envelope("B", SignalPayload::candidate(candidate))));
    }

    recv_signal(&mut a_recv, is_answer).await;
    let b_mem = b.factory.connection("A").unwrap();
    wait_until(|| b_mem.remote_candidate_count() == 3).await;

    assert!(b.has_record("A"));
    assert_eq!(1, b.factory.created_count("A"));
    assert!(!b.client.sent_signals().iter().any(|(_, p)| is_reset(p)));
}

#[tokio::test(flavor = "multi_thread")]
async fn call_marker_from_unknown_peer_is_ignored() {
    init_tracing();

    let net = MemNet::new();
    let relay = MemRelay::new();
    let mut a = TestPeer::new(&net, &relay, "A");
    let (b_client, _b_recv) = relay.connect("B").unwrap();

    let audio = CallOptions {
        audio: true,
        ..Default::default()
    };
    assert!(b_client.send(&envelope("A", SignalPayload::call(audio))));
    assert!(b_client.send(&envelope(
        "A",
        SignalPayload::Candidate { candidate: None },
    )));

    // frames are handled in order, once this arrives the signals were seen
    assert!(b_client.send(r#"{"to":"A","msg":"after"}"#));
    assert_eq!("after", a.next_app().await.extra["msg"]);

    assert!(!a.has_record("B"));
    assert_eq!(0, a.factory.created_count("B"));

    // so our own first send still negotiates
    assert!(a.rtc.send(&serde_json::json!({"to": "B"})));
    assert_eq!(1, a.factory.created_count("B"));
    assert_eq!(Role::Initiator, a.rtc.get_webrtc_map()["B"].role);
    assert!(a
        .client
        .sent_signals()
        .iter()
        .any(|(to, p)| to == "B" && is_start(p)));
}
