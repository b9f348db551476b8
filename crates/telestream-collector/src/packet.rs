//! Received telemetry and where it goes.
//!
//! Sessions do not interpret payloads. Every message read off a subscribe
//! stream is wrapped in a [`TelemetryPacket`] and handed to the session's
//! [`PacketSink`], either inline or on its own task depending on the
//! configured [`PacketStrategy`].

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use prost::Message;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

use telestream_proto::cisco::mdt::CreateSubsReply;
use telestream_proto::juniper::telemetry::OpenConfigData;

use crate::session::{SessionContext, SessionError, SessionState, StopSignal};
use crate::vendor::SubscribeOutcome;

/// Key Juniper puts on the first key-value of a packet to carry the path prefix.
const PREFIX_KEY: &str = "__prefix__";

/// How received packets are handed to the sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PacketStrategy {
    /// Spawn one task per packet so a slow sink never stalls the stream.
    #[default]
    PerPacketTask,
    /// Handle packets in the session's own task, in order.
    Sequential,
}

/// One message read off a device stream.
#[derive(Debug, Clone)]
pub enum TelemetryPacket {
    Juniper(OpenConfigData),
    Cisco(CreateSubsReply),
}

impl TelemetryPacket {
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Juniper(data) => data.encoded_len(),
            Self::Cisco(reply) => reply.encoded_len(),
        }
    }

    /// Device timestamp in milliseconds since the epoch, if the protocol carries one.
    pub const fn timestamp_ms(&self) -> Option<u64> {
        match self {
            Self::Juniper(data) => Some(data.timestamp),
            Self::Cisco(_) => None,
        }
    }

    /// `None` for protocols without a prefix convention.
    pub fn has_prefix(&self) -> Option<bool> {
        match self {
            Self::Juniper(data) => Some(data.kv.iter().any(|kv| kv.key == PREFIX_KEY)),
            Self::Cisco(_) => None,
        }
    }

    /// Envelope fields as JSON. Payload bodies are not rendered.
    pub fn summary_json(&self) -> serde_json::Value {
        match self {
            Self::Juniper(data) => serde_json::json!({
                "system_id": data.system_id,
                "component_id": data.component_id,
                "sub_component_id": data.sub_component_id,
                "path": data.path,
                "sequence_number": data.sequence_number,
                "timestamp": data.timestamp,
                "kv_count": data.kv.len(),
                "sync_response": data.sync_response,
            }),
            Self::Cisco(reply) => serde_json::json!({
                "request_id": reply.res_req_id,
                "data_bytes": reply.data.len(),
            }),
        }
    }
}

/// Consumer of received packets. Decoding and storage live behind this seam.
pub trait PacketSink: Send + Sync + 'static {
    fn handle(&self, ctx: &SessionContext, packet: TelemetryPacket);
}

/// Logs packet envelopes, honouring the session's payload knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl PacketSink for LogSink {
    fn handle(&self, ctx: &SessionContext, packet: TelemetryPacket) {
        let payload = &ctx.config().payload;

        if payload.prefix_check && packet.has_prefix() == Some(false) {
            warn!(unit = ctx.unit(), device = ctx.device(), "Packet without __prefix__");
        }

        if payload.latency_profile
            && let Some(sent_ms) = packet.timestamp_ms()
        {
            let latency_ms = now_ms().saturating_sub(sent_ms);
            info!(unit = ctx.unit(), device = ctx.device(), latency_ms, "Packet latency");
        }

        if payload.json {
            info!(
                unit = ctx.unit(),
                device = ctx.device(),
                packet = %packet.summary_json(),
                "Telemetry packet"
            );
        } else {
            debug!(
                unit = ctx.unit(),
                device = ctx.device(),
                bytes = packet.encoded_len(),
                "Telemetry packet"
            );
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Count a packet and pass it to the sink according to the strategy.
pub fn dispatch(ctx: &Arc<SessionContext>, packet: TelemetryPacket) {
    if let Some(stats) = ctx.stream_stats() {
        stats.record_message(packet.encoded_len());
    }
    ctx.collector().packet(ctx.device());

    match ctx.config().payload.strategy {
        PacketStrategy::Sequential => ctx.sink().handle(ctx, packet),
        PacketStrategy::PerPacketTask => {
            let ctx = Arc::clone(ctx);
            tokio::spawn(async move {
                ctx.sink().handle(&ctx, packet);
            });
        }
    }
}

/// Read a subscribe stream until it ends, fails, or the session is stopped.
///
/// The stop signal is raced against every read so a quiet stream cannot
/// delay shutdown.
pub async fn pump<S, T>(
    stream: &mut S,
    ctx: &Arc<SessionContext>,
    stop: &mut StopSignal,
    wrap: fn(T) -> Result<TelemetryPacket, SessionError>,
) -> SubscribeOutcome
where
    S: Stream<Item = Result<T, tonic::Status>> + Unpin,
{
    ctx.set_state(SessionState::Streaming);
    loop {
        tokio::select! {
            biased;
            () = stop.stopped() => return SubscribeOutcome::Stopped,
            item = stream.next() => match item {
                Some(Ok(message)) => match wrap(message) {
                    Ok(packet) => dispatch(ctx, packet),
                    Err(e) => return SubscribeOutcome::Failed(e),
                },
                Some(Err(status)) => {
                    return SubscribeOutcome::Failed(SessionError::from_status(&status));
                }
                None => return SubscribeOutcome::Completed,
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use tokio::sync::watch;
    use tokio_stream::wrappers::ReceiverStream;

    use telestream_core::DeviceConfig;
    use telestream_proto::juniper::telemetry::KeyValue;

    use crate::session::{Control, SessionConfig, SessionOptions};
    use crate::stats::CollectorStats;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<u64>>);

    impl PacketSink for Recorder {
        fn handle(&self, _ctx: &SessionContext, packet: TelemetryPacket) {
            if let TelemetryPacket::Juniper(data) = packet {
                self.0.lock().unwrap().push(data.sequence_number);
            }
        }
    }

    fn context(sink: Arc<dyn PacketSink>, options: &SessionOptions) -> Arc<SessionContext> {
        let device: DeviceConfig = serde_json::from_str(r#"{"host": "r1"}"#).unwrap();
        let (state, _) = watch::channel(SessionState::Subscribing);
        Arc::new(SessionContext::new(
            "r1.json".into(),
            "juniper-junos".into(),
            Arc::new(SessionConfig::new(device, options)),
            sink,
            Arc::new(CollectorStats::new()),
            state,
        ))
    }

    fn sequential() -> SessionOptions {
        let mut options = SessionOptions::default();
        options.payload.strategy = PacketStrategy::Sequential;
        options.stats_handler = true;
        options
    }

    fn juniper(seq: u64) -> OpenConfigData {
        OpenConfigData {
            sequence_number: seq,
            ..OpenConfigData::default()
        }
    }

    #[test]
    fn prefix_detection() {
        let mut data = juniper(1);
        assert_eq!(TelemetryPacket::Juniper(data.clone()).has_prefix(), Some(false));
        data.kv.push(KeyValue {
            key: PREFIX_KEY.into(),
            value: None,
        });
        assert_eq!(TelemetryPacket::Juniper(data).has_prefix(), Some(true));
        assert_eq!(
            TelemetryPacket::Cisco(CreateSubsReply::default()).has_prefix(),
            None
        );
    }

    #[test]
    fn summary_json_describes_envelope() {
        let mut data = juniper(7);
        data.path = "/interfaces/".into();
        let summary = TelemetryPacket::Juniper(data).summary_json();
        assert_eq!(summary["sequence_number"], 7);
        assert_eq!(summary["path"], "/interfaces/");
    }

    #[tokio::test]
    async fn pump_delivers_in_order_then_completes() {
        let recorder = Arc::new(Recorder::default());
        let ctx = context(recorder.clone(), &sequential());
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        for seq in 1..=3 {
            tx.send(Ok(juniper(seq))).await.unwrap();
        }
        drop(tx);
        let (_control, mut stop) = StopSignal::channel();

        let outcome = pump(
            &mut ReceiverStream::new(rx),
            &ctx,
            &mut stop,
            |d| Ok(TelemetryPacket::Juniper(d)),
        )
        .await;

        assert!(matches!(outcome, SubscribeOutcome::Completed));
        assert_eq!(*recorder.0.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(ctx.state(), SessionState::Streaming);
        assert_eq!(ctx.stream_stats().unwrap().messages(), 3);
    }

    #[tokio::test]
    async fn pump_maps_stream_error() {
        let ctx = context(Arc::new(LogSink), &sequential());
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        tx.send(Err(tonic::Status::unavailable("reset"))).await.unwrap();
        let (_control, mut stop) = StopSignal::channel();

        let outcome = pump(
            &mut ReceiverStream::<Result<OpenConfigData, _>>::new(rx),
            &ctx,
            &mut stop,
            |d| Ok(TelemetryPacket::Juniper(d)),
        )
        .await;

        match outcome {
            SubscribeOutcome::Failed(SessionError::Transport(msg)) => {
                assert!(msg.contains("reset"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stop_interrupts_idle_stream() {
        let ctx = context(Arc::new(LogSink), &sequential());
        let (_tx, rx) = tokio::sync::mpsc::channel::<Result<OpenConfigData, tonic::Status>>(1);
        let (control, mut stop) = StopSignal::channel();
        control.send(Control::Stop).await.unwrap();

        let outcome = pump(
            &mut ReceiverStream::new(rx),
            &ctx,
            &mut stop,
            |d| Ok(TelemetryPacket::Juniper(d)),
        )
        .await;

        assert!(matches!(outcome, SubscribeOutcome::Stopped));
    }

    #[tokio::test]
    async fn per_packet_task_still_reaches_sink() {
        let recorder = Arc::new(Recorder::default());
        let ctx = context(recorder.clone(), &SessionOptions::default());
        dispatch(&ctx, TelemetryPacket::Juniper(juniper(42)));
        for _ in 0..100 {
            if !recorder.0.lock().unwrap().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(*recorder.0.lock().unwrap(), vec![42]);
    }
}
