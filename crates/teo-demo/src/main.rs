#![deny(warnings)]
#![deny(unsafe_code)]
//! teo-demo

use clap::Parser;
use std::io::Result;
use std::sync::Arc;
use teo_rtc::backend::{MediaStream, MediaTrack, MemNet};
use teo_rtc::teo_signal::MemRelay;
use teo_rtc::{CallOptions, Error, PeerId, RtcConfig, TeoRtc};

#[derive(Debug, Parser)]
#[command(
    name = "teo-demo",
    version,
    about = "Teonet WebRTC Direct-Connect Demo Cli"
)]
struct Args {
    /// Tracing logs will be written to the given file.
    /// Any existing file will be deleted first.
    /// You can use the environment variable `RUST_LOG` to control
    /// and filter the output. Defaults to INFO level.
    #[arg(long)]
    pub trace_file: Option<std::path::PathBuf>,

    /// Json overlay configuration file. Defaults are used if omitted.
    #[arg(long)]
    pub config: Option<std::path::PathBuf>,

    /// Number of in-process peers.
    #[arg(long, default_value_t = 3)]
    pub peers: usize,

    /// Number of hello rounds, every peer greets a random other peer
    /// each round.
    #[arg(long, default_value_t = 5)]
    pub rounds: usize,

    /// Milliseconds to wait between rounds.
    #[arg(long, default_value_t = 200)]
    pub interval_ms: u64,

    /// After the rounds, call from the first peer to the second.
    #[arg(long)]
    pub call: bool,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    if let Err(err) = main_err().await {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

enum Lvl {
    Info,
    Error,
}

macro_rules! d {
    (info, $tag:literal) => {
        d!(@ (Lvl::Info) $tag "")
    };
    (info, $tag:literal, $($arg:tt)*) => {
        d!(@ (Lvl::Info) $tag format!($($arg)*))
    };
    (error, $tag:literal) => {
        d!(@ (Lvl::Error) $tag "")
    };
    (error, $tag:literal, $($arg:tt)*) => {
        d!(@ (Lvl::Error) $tag format!($($arg)*))
    };
    (@ ($lvl:path) $tag:literal $log:expr) => {{
        match $lvl {
            Lvl::Info => {
                tracing::info!("# {} # {} #", $tag, $log);
                println!("# teo-demo # INFO # {} # {} #", $tag, $log);
            }
            Lvl::Error => {
                tracing::error!("# {} # {} #", $tag, $log);
                println!("# teo-demo # ERROR # {} # {} #", $tag, $log);
            }
        }
    }};
}

fn init_tracing(
    trace_file: Option<std::path::PathBuf>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let trace_file = match trace_file {
        Some(trace_file) => trace_file,
        None => return Ok(None),
    };

    let _ = std::fs::remove_file(&trace_file);

    let dir = match trace_file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    let name = trace_file
        .file_name()
        .ok_or_else(|| Error::id_info("InvalidTraceFile", "no file name"))?;

    let app = tracing_appender::rolling::never(dir, name);
    let (app, app_guard) =
        tracing_appender::non_blocking::NonBlockingBuilder::default()
            .lossy(false)
            .finish(app);

    tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::builder()
                .with_default_directive(
                    tracing_subscriber::filter::LevelFilter::INFO.into(),
                )
                .from_env_lossy(),
        )
        .with_file(true)
        .with_line_number(true)
        .with_writer(app)
        .init();

    Ok(Some(app_guard))
}

async fn load_config(path: Option<std::path::PathBuf>) -> Result<RtcConfig> {
    match path {
        Some(path) => {
            let data = tokio::fs::read(&path).await?;
            Ok(serde_json::from_slice(&data)?)
        }
        None => Ok(RtcConfig::default()),
    }
}

struct Node {
    rtc: TeoRtc,
    _recv_task: tokio::task::JoinHandle<()>,
}

impl Drop for Node {
    fn drop(&mut self) {
        self._recv_task.abort();
    }
}

impl Node {
    pub fn new(
        relay: &Arc<MemRelay>,
        net: &Arc<MemNet>,
        config: RtcConfig,
        name: &str,
    ) -> Result<Self> {
        let (client, mut recv) = relay.connect(name)?;
        let rtc = TeoRtc::new(config, net.factory(name), client);
        rtc.on_open();

        let recv_rtc = rtc.clone();
        let recv_task = tokio::task::spawn(async move {
            let this_id = recv_rtc.local_id();
            while let Some(frame) = recv.recv().await {
                if let Some(frame) = recv_rtc.on_relay_frame(frame) {
                    let from = frame
                        .from
                        .as_ref()
                        .map(|f| f.to_string())
                        .unwrap_or_default();
                    d!(
                        info,
                        "RECV",
                        "{this_id} <- {from}: {}",
                        serde_json::Value::Object(frame.extra.clone()),
                    );
                }
            }
        });

        Ok(Self {
            rtc,
            _recv_task: recv_task,
        })
    }

    pub fn hello(&self, others: &[PeerId], round: usize) {
        use rand::seq::SliceRandom;

        let this_id = self.rtc.local_id();
        let mut others = others
            .iter()
            .filter(|p| **p != this_id)
            .cloned()
            .collect::<Vec<_>>();
        others.shuffle(&mut rand::rng());
        let to = match others.first() {
            Some(to) => to,
            None => return,
        };

        let route = if self.rtc.is_connected(to) {
            "direct"
        } else {
            "relay"
        };
        let msg = serde_json::json!({
            "to": to,
            "hello": round,
        });
        if self.rtc.send(&msg) {
            d!(info, "SEND", "{this_id} -> {to} via {route}");
        } else {
            d!(error, "SEND_ERROR", "{this_id} -> {to} via {route}");
        }
    }
}

async fn main_err() -> Result<()> {
    let Args {
        trace_file,
        config,
        peers,
        rounds,
        interval_ms,
        call,
    } = Args::parse();

    let _app_guard = init_tracing(trace_file)?;

    let config = load_config(config).await?;

    if peers < 2 {
        return Err(Error::id_info("InvalidArgs", "need at least two peers"));
    }

    let relay = MemRelay::new();
    let net = MemNet::new();

    let mut nodes = Vec::with_capacity(peers);
    for i in 0..peers {
        let name = format!("peer-{i}");
        nodes.push(Node::new(&relay, &net, config.clone(), &name)?);
    }
    let ids = nodes.iter().map(|n| n.rtc.local_id()).collect::<Vec<_>>();

    d!(info, "STARTED", "{ids:?}");

    let interval = std::time::Duration::from_millis(interval_ms);

    for round in 0..rounds {
        for node in nodes.iter() {
            node.hello(&ids, round);
        }
        tokio::time::sleep(interval).await;
    }

    if call {
        let caller = &nodes[0].rtc;
        let callee = &nodes[1].rtc;
        let callee_id = callee.local_id();

        callee.register_call_answer(|peer_id, stream| match stream {
            Some(stream) => d!(
                info,
                "CALL_STREAM",
                "from {peer_id}: {} tracks",
                stream.tracks.len()
            ),
            None => d!(info, "CALL_ENDED", "with {peer_id}"),
        });

        let media = MediaStream {
            id: format!("{}-media", caller.local_id()),
            tracks: vec![MediaTrack::audio("mic"), MediaTrack::video("cam")],
        };
        let options = CallOptions {
            audio: true,
            video: true,
            chat: false,
        };

        if caller.call(&callee_id, Some(&media), options) {
            d!(info, "CALL", "{} -> {callee_id}", caller.local_id());
            tokio::time::sleep(interval).await;
            caller.hangup(&callee_id);
            tokio::time::sleep(interval).await;
        } else {
            d!(
                error,
                "CALL_ERROR",
                "no direct connection {} -> {callee_id}",
                caller.local_id()
            );
        }
    }

    for node in nodes.iter() {
        d!(
            info,
            "MAP",
            "{} {}",
            node.rtc.local_id(),
            serde_json::to_string(&node.rtc.get_webrtc_map())?,
        );
    }

    for node in nodes.iter() {
        node.rtc.on_close();
        relay.disconnect(&node.rtc.local_id());
    }

    Ok(())
}
