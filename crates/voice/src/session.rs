//! Session lifecycle: the controller state machine.
//!
//! `idle -> connecting -> connected -> {closed | errored}`, re-startable
//! from any terminal state. One controller instance owns its device
//! handles and its session exclusively; concurrent voice sessions are
//! separate instances.

use crate::config::VoiceConfig;
use crate::device::AudioBackend;
use crate::error::VoiceError;
use crate::playback::PlaybackScheduler;
use crate::tools::ToolCallBridge;
use crate::transport::{ServerEvent, SessionConfig, SessionConnector};
use crate::uplink::{AudioUplink, VolumeSignal};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Connecting,
    Connected,
    Closed,
    Errored { message: String },
}

/// Callbacks into the embedding UI. Defaults are no-ops.
pub struct HostCallbacks {
    pub on_status: Box<dyn Fn(SessionStatus) + Send + Sync>,
    pub on_volume: Box<dyn Fn(f32) + Send + Sync>,
    /// Fired for every tool invocation as it arrives, so the host can
    /// observe side effects (e.g. a spoken name) outside the bridge's
    /// own registry.
    pub on_tool_side_effect: Box<dyn Fn(&str, &Value) + Send + Sync>,
}

impl Default for HostCallbacks {
    fn default() -> Self {
        Self {
            on_status: Box::new(|_| {}),
            on_volume: Box::new(|_| {}),
            on_tool_side_effect: Box::new(|_, _| {}),
        }
    }
}

struct Inner {
    status: SessionStatus,
    hangup: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

pub struct SessionController {
    backend: Arc<dyn AudioBackend>,
    connector: Arc<dyn SessionConnector>,
    config: VoiceConfig,
    session_config: SessionConfig,
    callbacks: Arc<HostCallbacks>,
    bridge: Arc<Mutex<ToolCallBridge>>,
    inner: Arc<Mutex<Inner>>,
}

impl SessionController {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        connector: Arc<dyn SessionConnector>,
        config: VoiceConfig,
        session_config: SessionConfig,
        callbacks: HostCallbacks,
    ) -> Self {
        Self {
            backend,
            connector,
            config,
            session_config,
            callbacks: Arc::new(callbacks),
            bridge: Arc::new(Mutex::new(ToolCallBridge::new())),
            inner: Arc::new(Mutex::new(Inner {
                status: SessionStatus::Idle,
                hangup: None,
                task: None,
            })),
        }
    }

    /// Registers a named tool handler. Must be called before `start` for
    /// the handler to be visible to the running session.
    pub fn register_tool<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.bridge.lock().unwrap().register(name, handler);
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.lock().unwrap().status.clone()
    }

    /// Begins a session attempt. Rejected while an attempt is already
    /// connecting or connected; never queued.
    pub fn start(&self) -> Result<(), VoiceError> {
        let hangup_rx = {
            let mut inner = self.inner.lock().unwrap();
            if matches!(
                inner.status,
                SessionStatus::Connecting | SessionStatus::Connected
            ) {
                return Err(VoiceError::SessionActive);
            }
            inner.status = SessionStatus::Connecting;
            let (hangup_tx, hangup_rx) = oneshot::channel();
            inner.hangup = Some(hangup_tx);
            hangup_rx
        };
        (self.callbacks.on_status)(SessionStatus::Connecting);

        let task = tokio::spawn(run_session(
            self.backend.clone(),
            self.connector.clone(),
            self.config.clone(),
            self.session_config.clone(),
            self.callbacks.clone(),
            self.bridge.clone(),
            self.inner.clone(),
            hangup_rx,
        ));
        self.inner.lock().unwrap().task = Some(task);
        Ok(())
    }

    /// Ends the current attempt, running the cleanup path, and lands in
    /// `Closed`. Safe to call in any state.
    pub async fn hangup(&self) {
        let (hangup, task) = {
            let mut inner = self.inner.lock().unwrap();
            (inner.hangup.take(), inner.task.take())
        };
        if let Some(tx) = hangup {
            let _ = tx.send(());
        }
        match task {
            Some(task) => {
                let _ = task.await;
            }
            None => {
                // No live attempt; still land in Closed per the lifecycle
                // contract.
                self.inner.lock().unwrap().status = SessionStatus::Closed;
                (self.callbacks.on_status)(SessionStatus::Closed);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_session(
    backend: Arc<dyn AudioBackend>,
    connector: Arc<dyn SessionConnector>,
    config: VoiceConfig,
    session_config: SessionConfig,
    callbacks: Arc<HostCallbacks>,
    bridge: Arc<Mutex<ToolCallBridge>>,
    inner: Arc<Mutex<Inner>>,
    hangup_rx: oneshot::Receiver<()>,
) {
    let result = drive_session(
        &backend,
        &connector,
        &config,
        &session_config,
        &callbacks,
        &bridge,
        &inner,
        hangup_rx,
    )
    .await;

    // Connected-phase UI signals return to zero on every exit path.
    (callbacks.on_volume)(0.0);

    let status = match result {
        Ok(()) => {
            info!("voice session closed");
            SessionStatus::Closed
        }
        Err(e) => {
            error!(error = %e, "voice session failed");
            SessionStatus::Errored {
                message: e.to_string(),
            }
        }
    };
    {
        let mut inner = inner.lock().unwrap();
        inner.status = status.clone();
        inner.hangup = None;
    }
    (callbacks.on_status)(status);
}

#[allow(clippy::too_many_arguments)]
async fn drive_session(
    backend: &Arc<dyn AudioBackend>,
    connector: &Arc<dyn SessionConnector>,
    config: &VoiceConfig,
    session_config: &SessionConfig,
    callbacks: &Arc<HostCallbacks>,
    bridge: &Arc<Mutex<ToolCallBridge>>,
    inner: &Arc<Mutex<Inner>>,
    mut hangup_rx: oneshot::Receiver<()>,
) -> Result<(), VoiceError> {
    // Setup phase: failures here return early and release whatever was
    // already acquired by drop.
    let (capture, frames) = backend.open_capture(config.capture_block_size)?;
    let capture_rate = capture.sample_rate();
    let output = backend.open_output(config.playback_sample_rate)?;
    let (mut sink, mut events) = connector.open(session_config).await?;

    {
        inner.lock().unwrap().status = SessionStatus::Connected;
    }
    (callbacks.on_status)(SessionStatus::Connected);
    info!(capture_rate, "voice session connected");

    let (outbound_tx, mut outbound_rx) = mpsc::channel(64);
    let volume: VolumeSignal = {
        let callbacks = callbacks.clone();
        Arc::new(move |level| (callbacks.on_volume)(level))
    };
    let uplink = AudioUplink::start(
        frames,
        outbound_tx,
        capture_rate,
        config.target_sample_rate,
        volume,
    );
    let mut scheduler = PlaybackScheduler::new(output, config.playback_lead);

    // Inbound handling is serialized here: the scheduler and the bridge
    // never race each other for the same session.
    let outcome = loop {
        tokio::select! {
            _ = &mut hangup_rx => {
                info!("user hangup");
                break Ok(());
            }
            Some(frame) = outbound_rx.recv() => {
                if let Err(e) = sink.send_audio_frame(frame).await {
                    break Err(e);
                }
            }
            event = events.recv() => match event {
                Some(ServerEvent::AudioChunk { data }) => scheduler.enqueue(&data),
                Some(ServerEvent::ToolCall(invocation)) => {
                    (callbacks.on_tool_side_effect)(&invocation.name, &invocation.args);
                    let result = bridge.lock().unwrap().handle(&invocation);
                    if let Some(result) = result {
                        if let Err(e) = sink.send_tool_result(result).await {
                            break Err(e);
                        }
                    }
                }
                Some(ServerEvent::Interrupted) => scheduler.flush(),
                Some(ServerEvent::Closed) | None => break Ok(()),
                Some(ServerEvent::Error { message }) => break Err(VoiceError::Transport(message)),
            }
        }
    };

    // Unconditional cleanup, exactly once for every way out of the loop:
    // stop the capture pipeline, silence playback, close the session,
    // release the devices.
    uplink.stop().await;
    scheduler.flush();
    if let Err(e) = sink.close().await {
        warn!(error = %e, "session close reported an error");
    }
    drop(capture);
    outcome
}
