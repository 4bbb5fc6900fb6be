//! Broadcast hub: the single coordinator that owns every session and the
//! replay history.
//!
//! All mutations are serialized through one command queue. Callers hold a
//! cloneable [`HubHandle`]; commands that produce a result carry a oneshot
//! reply. The hub never touches sockets: each attached session contributes a
//! bounded outbound queue, and a failed enqueue is treated as a detach of
//! that session alone.

pub mod history;
pub mod link;
pub mod registry;


use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chat_auth::IdentityResolver;
use chat_core::{render, rgb_to_xterm256, ChatMessage, Envelope, LivenessPing, PresenceRoster};
use chat_settings::ChatSettings;
use chrono::Utc;
use metrics::{counter, gauge};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::HubError;
use crate::metrics::{
    ATTACH_REJECTED_TOTAL, CHAT_MESSAGES_TOTAL, LIVENESS_EVICTIONS_TOTAL, LIVENESS_PINGS_TOTAL,
    OUTBOUND_DROPS_TOTAL, SESSIONS_ATTACHED,
};
use crate::sink::{ArchiveWriter, DigestSink};

pub use history::HistoryBuffer;
pub use link::{outbound_queue, ConnectionId, Link, OutboundReceiver, OutboundSender, Outgoing};
pub use registry::{Session, SessionRegistry};

const COMMAND_QUEUE: usize = 1024;

/// Display name used for hub-generated replies.
pub const SYSTEM_NAME: &str = "chat";

const HELP_TEXT: &str = "/help     show this help\n/roster   list who is in the room";

/// Hub policy knobs.
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Idle time after which a session is pinged.
    pub silent_after: Duration,
    /// Idle time after which a session is evicted. Greater than `silent_after`.
    pub dead_after: Duration,
    /// Replay buffer capacity.
    pub history_limit: usize,
    /// Lowercase display name → `RRGGBB`.
    pub colors: BTreeMap<String, String>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            silent_after: Duration::from_secs(480),
            dead_after: Duration::from_secs(720),
            history_limit: 1000,
            colors: BTreeMap::new(),
        }
    }
}

impl HubConfig {
    /// Extract the hub's share of the settings.
    pub fn from_settings(settings: &ChatSettings) -> Self {
        Self {
            silent_after: settings.liveness.silent_after(),
            dead_after: settings.liveness.dead_after(),
            history_limit: settings.history.limit,
            colors: settings.colors.clone(),
        }
    }

    fn color_for(&self, name: &str) -> &str {
        self.colors
            .get(&name.to_lowercase())
            .map_or("", String::as_str)
    }
}

/// Successful attach.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attached {
    /// Id of the new connection; quote it in every later command.
    pub conn: ConnectionId,
    /// Resolved display name.
    pub name: String,
    /// Whether an existing session was re-attached.
    pub resumed: bool,
}

/// A chat message submitted from outside a socket (HTTP receiver, uploads).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    /// Token of the submitting user. If that user is attached, they get the
    /// echo instead of the notification.
    pub token: String,
    /// Sender display name.
    pub name: String,
    /// Message text. Plain text unless `markup` is set.
    pub text: String,
    /// `text` is trusted HTML built by the server and is sent unescaped.
    pub markup: bool,
    /// Notification text overriding the default digest.
    pub label: Option<String>,
}

impl Submission {
    /// Plain text typed by `name`.
    pub fn plain(token: impl Into<String>, name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            name: name.into(),
            text: text.into(),
            markup: false,
            label: None,
        }
    }

    /// Server-built markup with its own notification label.
    pub fn markup(
        token: impl Into<String>,
        name: impl Into<String>,
        html: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            name: name.into(),
            text: html.into(),
            markup: true,
            label: Some(label.into()),
        }
    }
}

/// What a sweep did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Names pinged.
    pub pinged: Vec<String>,
    /// Attached sessions evicted for silence.
    pub evicted: Vec<String>,
    /// Detached sessions purged.
    pub purged: Vec<String>,
    /// Whether a digest block was handed to the digest sink.
    pub digest_published: bool,
}

/// One row of [`HubSnapshot`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSummary {
    /// Display name.
    pub name: String,
    /// Whether a live link is present.
    pub attached: bool,
    /// Last ping sequence sent.
    pub ping_seq: u64,
}

/// Point-in-time view of hub state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HubSnapshot {
    /// Every known session in registry order.
    pub sessions: Vec<SessionSummary>,
    /// Number of envelopes in the replay buffer.
    pub history_len: usize,
}

impl HubSnapshot {
    /// Number of attached sessions.
    pub fn attached(&self) -> usize {
        self.sessions.iter().filter(|s| s.attached).count()
    }

    /// Summary for `name`, if present.
    pub fn session(&self, name: &str) -> Option<&SessionSummary> {
        self.sessions.iter().find(|s| s.name == name)
    }
}

enum HubCommand {
    Attach {
        token: String,
        outbound: OutboundSender,
        reply: oneshot::Sender<Result<Attached, HubError>>,
    },
    Inbound {
        conn: ConnectionId,
        envelope: Envelope,
    },
    Inject(Submission),
    Detach {
        conn: ConnectionId,
    },
    Sweep {
        reply: oneshot::Sender<SweepReport>,
    },
    Snapshot {
        reply: oneshot::Sender<HubSnapshot>,
    },
    History {
        reply: oneshot::Sender<Vec<Envelope>>,
    },
}

/// Cloneable front door to the hub task.
#[derive(Clone, Debug)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    /// Resolve `token` and bind `outbound` to its session. History replay
    /// and the roster update are queued on `outbound` before this returns.
    pub async fn attach(
        &self,
        token: impl Into<String>,
        outbound: OutboundSender,
    ) -> Result<Attached, HubError> {
        let token = token.into();
        self.request(|reply| HubCommand::Attach {
            token,
            outbound,
            reply,
        })
        .await?
    }

    /// Hand a decoded client envelope to the hub.
    pub async fn inbound(&self, conn: ConnectionId, envelope: Envelope) -> Result<(), HubError> {
        self.send(HubCommand::Inbound { conn, envelope }).await
    }

    /// Submit a chat message on behalf of a user.
    pub async fn inject(&self, submission: Submission) -> Result<(), HubError> {
        self.send(HubCommand::Inject(submission)).await
    }

    /// Drop the link for `conn`. Unknown or stale ids are ignored.
    pub async fn detach(&self, conn: ConnectionId) -> Result<(), HubError> {
        self.send(HubCommand::Detach { conn }).await
    }

    /// Run one liveness sweep and wait for it to finish.
    pub async fn sweep(&self) -> Result<SweepReport, HubError> {
        self.request(|reply| HubCommand::Sweep { reply }).await
    }

    /// Current sessions and history size.
    pub async fn snapshot(&self) -> Result<HubSnapshot, HubError> {
        self.request(|reply| HubCommand::Snapshot { reply }).await
    }

    /// Copy of the replay buffer.
    pub async fn history(&self) -> Result<Vec<Envelope>, HubError> {
        self.request(|reply| HubCommand::History { reply }).await
    }

    /// Whether the hub task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, cmd: HubCommand) -> Result<(), HubError> {
        self.tx.send(cmd).await.map_err(|_| HubError::Closed)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> HubCommand,
    ) -> Result<T, HubError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(make(reply_tx)).await?;
        reply_rx.await.map_err(|_| HubError::Closed)
    }
}

/// Hub state. Build with [`Hub::new`], then [`Hub::spawn`] it.
pub struct Hub {
    config: HubConfig,
    registry: SessionRegistry,
    history: HistoryBuffer,
    resolver: Arc<dyn IdentityResolver>,
    archive: Option<ArchiveWriter>,
    digest: Arc<dyn DigestSink>,
    pending_digest: String,
}

impl Hub {
    /// New hub with an empty registry.
    pub fn new(
        config: HubConfig,
        resolver: Arc<dyn IdentityResolver>,
        digest: Arc<dyn DigestSink>,
    ) -> Self {
        Self {
            history: HistoryBuffer::new(config.history_limit),
            config,
            registry: SessionRegistry::new(),
            resolver,
            archive: None,
            digest,
            pending_digest: String::new(),
        }
    }

    /// Also append every chat record to an archive.
    #[must_use]
    pub fn with_archive(mut self, archive: ArchiveWriter) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Start the coordinator task. It runs until `cancel` fires or every
    /// handle is dropped; on exit all outbound queues close.
    pub fn spawn(self, cancel: CancellationToken) -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let task = tokio::spawn(self.run(rx, cancel));
        (HubHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<HubCommand>, cancel: CancellationToken) {
        info!(history_limit = self.history.limit(), "hub started");
        loop {
            let cmd = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!("hub shutting down");
                    break;
                }
                cmd = rx.recv() => cmd,
            };
            let Some(cmd) = cmd else {
                info!("hub command queue closed");
                break;
            };
            self.handle(cmd).await;
            self.record_gauges();
        }
        gauge!(SESSIONS_ATTACHED).set(0.0);
    }

    async fn handle(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Attach {
                token,
                outbound,
                reply,
            } => {
                let result = self.attach(&token, outbound).await;
                let _ = reply.send(result);
            }
            HubCommand::Inbound { conn, envelope } => self.inbound(conn, envelope),
            HubCommand::Inject(submission) => self.inject(submission),
            HubCommand::Detach { conn } => {
                if self.unlink(conn, "connection closed") {
                    self.broadcast_roster();
                }
            }
            HubCommand::Sweep { reply } => {
                let report = self.sweep();
                let _ = reply.send(report);
            }
            HubCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            HubCommand::History { reply } => {
                let _ = reply.send(self.history.envelopes().cloned().collect());
            }
        }
    }

    async fn attach(&mut self, token: &str, outbound: OutboundSender) -> Result<Attached, HubError> {
        let identity = match self.resolver.resolve(token).await {
            Ok(identity) => identity,
            Err(e) => {
                counter!(ATTACH_REJECTED_TOTAL).increment(1);
                warn!(error = %e, "attach rejected");
                return Err(e.into());
            }
        };

        let conn = ConnectionId::new();
        let link = Link::new(conn, outbound);
        let now = Instant::now();

        let (name, resumed) = if let Some(session) = self.registry.find_by_token_mut(&identity.token) {
            if let Some(old) = session.replace_link(link) {
                info!(name = %session.name, old = %old.conn(), new = %conn, "replacing live connection");
            }
            session.last_ack = now;
            (session.name.clone(), true)
        } else {
            let name = identity.name.clone();
            let _ = self
                .registry
                .insert(Session::new(identity.token, identity.name, link, now));
            (name, false)
        };
        info!(%name, %conn, resumed, "session attached");

        let frames = self.history.frames();
        if !frames.is_empty() && !self.deliver_to(conn, Outgoing::Batch(frames)) {
            let _ = self.unlink(conn, "history replay failed");
        }
        self.broadcast_roster();

        Ok(Attached {
            conn,
            name,
            resumed,
        })
    }

    fn inbound(&mut self, conn: ConnectionId, envelope: Envelope) {
        match envelope {
            Envelope::Chat(message) => self.chat_from(conn, &message.text),
            Envelope::Ping(ping) => self.ack_from(conn, &ping),
            Envelope::Roster(_) => debug!(%conn, "ignoring roster sent by client"),
        }
    }

    fn chat_from(&mut self, conn: ConnectionId, text: &str) {
        let now = Instant::now();
        let Some(session) = self.registry.find_by_conn_mut(conn) else {
            debug!(%conn, "chat from detached connection dropped");
            return;
        };
        session.last_message = Some(now);
        session.last_ack = now;
        let name = session.name.clone();

        let text = text.trim();
        match text {
            "" => debug!(%name, "empty chat message dropped"),
            "/roster" => self.reply_roster(conn),
            "/help" => self.reply_help(conn),
            _ => self.publish_chat(Some(conn), &name, text, false, None),
        }
    }

    fn ack_from(&mut self, conn: ConnectionId, ping: &LivenessPing) {
        let Some(session) = self.registry.find_by_conn_mut(conn) else {
            debug!(%conn, "pong from detached connection dropped");
            return;
        };
        if session.ping_seq == 0 || ping.pong < session.ping_seq {
            debug!(name = %session.name, pong = ping.pong, expected = session.ping_seq, "ignoring stale pong");
            return;
        }
        session.last_ack = Instant::now();
        debug!(name = %session.name, pong = ping.pong, "liveness acknowledged");
        self.broadcast_roster();
    }

    fn inject(&mut self, submission: Submission) {
        let Submission {
            token,
            name,
            text,
            markup,
            label,
        } = submission;
        let text = text.trim();
        if text.is_empty() {
            debug!(%name, "empty injected message dropped");
            return;
        }
        let origin = self.registry.find_by_token_mut(&token).and_then(|session| {
            session.last_message = Some(Instant::now());
            session.conn()
        });
        self.publish_chat(origin, &name, text, markup, label);
    }

    /// Stamp, render, record, and fan out one chat message. `origin` receives
    /// the echo (notification cleared); every other attached session receives
    /// the notification. `markup` text is trusted HTML and skips escaping.
    fn publish_chat(
        &mut self,
        origin: Option<ConnectionId>,
        name: &str,
        text: &str,
        markup: bool,
        label: Option<String>,
    ) {
        let ts = Utc::now();
        let notification = label.unwrap_or_else(|| {
            render::notification_digest(&render::escape_html(text))
        });
        let (escaped, body) = if markup {
            (text.to_owned(), text.to_owned())
        } else {
            let escaped = render::escape_html(render::autoreplace(text));
            let body = render::body_html(&escaped);
            (escaped, body)
        };
        let color = self.config.color_for(name).to_owned();

        let message = ChatMessage {
            ts,
            name: name.to_owned(),
            html: render::live_html(name, &body, ts),
            notification,
            color_xterm256: rgb_to_xterm256(&color),
            color,
            text: escaped,
        };
        let echo = Envelope::Chat(ChatMessage {
            notification: String::new(),
            ..message.clone()
        });
        let (Some(fan_frame), Some(echo_frame)) = (encode(&Envelope::Chat(message)), encode(&echo))
        else {
            return;
        };

        let _ = self.history.record(echo, Arc::clone(&echo_frame));
        let mut failed = self.fan_out(&fan_frame, origin);
        if let Some(conn) = origin {
            if !self.deliver_to(conn, Outgoing::Frame(echo_frame)) {
                failed.push(conn);
            }
        }
        counter!(CHAT_MESSAGES_TOTAL).increment(1);
        debug!(%name, recipients = self.registry.attached_count(), "chat message published");

        let record = render::archive_html(name, &body, ts);
        if let Some(archive) = &self.archive {
            archive.record(record.clone());
        }
        self.pending_digest.push_str(&record);

        self.settle(failed);
    }

    fn reply_roster(&mut self, conn: ConnectionId) {
        let Some(frame) = encode(&Envelope::Roster(self.roster())) else {
            return;
        };
        if !self.deliver_to(conn, Outgoing::Frame(frame)) {
            self.settle(vec![conn]);
        }
    }

    fn reply_help(&mut self, conn: ConnectionId) {
        let ts = Utc::now();
        let help = ChatMessage {
            ts,
            name: SYSTEM_NAME.to_owned(),
            text: HELP_TEXT.to_owned(),
            html: format!("<p><pre>{}</pre></p>\n", render::escape_html(HELP_TEXT)),
            ..ChatMessage::default()
        };
        let Some(frame) = encode(&Envelope::Chat(help)) else {
            return;
        };
        if !self.deliver_to(conn, Outgoing::Frame(frame)) {
            self.settle(vec![conn]);
        }
    }

    fn sweep(&mut self) -> SweepReport {
        let now = Instant::now();
        let silent_after = self.config.silent_after;
        let dead_after = self.config.dead_after;
        let mut report = SweepReport::default();
        let mut failed = Vec::new();

        for session in self.registry.iter_mut() {
            let idle = now.saturating_duration_since(session.last_ack);
            if !session.is_attached() || idle <= silent_after || idle > dead_after {
                continue;
            }
            session.ping_seq += 1;
            let ping = Envelope::Ping(LivenessPing {
                ts: Utc::now(),
                ping: session.ping_seq,
                pong: 0,
            });
            counter!(LIVENESS_PINGS_TOTAL).increment(1);
            let delivered = encode(&ping).is_some_and(|frame| {
                session
                    .link()
                    .is_some_and(|link| link.deliver(Outgoing::Frame(frame)))
            });
            if delivered {
                debug!(name = %session.name, seq = session.ping_seq, idle_secs = idle.as_secs(), "ping sent");
                report.pinged.push(session.name.clone());
            } else if let Some(conn) = session.conn() {
                counter!(OUTBOUND_DROPS_TOTAL).increment(1);
                failed.push(conn);
            }
        }

        let stale: Vec<String> = self
            .registry
            .iter()
            .filter(|session| now.saturating_duration_since(session.last_ack) > dead_after)
            .map(|session| session.token.clone())
            .collect();
        for token in stale {
            let Some(session) = self.registry.remove(&token) else {
                continue;
            };
            if session.is_attached() {
                report.evicted.push(session.name);
            } else {
                report.purged.push(session.name);
            }
        }
        for name in &report.evicted {
            counter!(LIVENESS_EVICTIONS_TOTAL).increment(1);
            warn!(%name, "no liveness acknowledgment, evicting session");
        }
        for name in &report.purged {
            debug!(%name, "purged detached session");
        }

        let roster_changed = !report.evicted.is_empty() || !failed.is_empty();
        for conn in failed {
            let _ = self.unlink(conn, "ping delivery failed");
        }
        if roster_changed {
            self.broadcast_roster();
        }

        report.digest_published = self.publish_digest();
        report
    }

    /// Hand the accumulated records to the digest sink in the background.
    fn publish_digest(&mut self) -> bool {
        if self.pending_digest.is_empty() {
            return false;
        }
        let block = std::mem::take(&mut self.pending_digest);
        let sink = Arc::clone(&self.digest);
        drop(tokio::spawn(async move {
            if let Err(e) = sink.publish(block).await {
                warn!(error = %e, "digest delivery failed");
            }
        }));
        true
    }

    fn snapshot(&self) -> HubSnapshot {
        HubSnapshot {
            sessions: self
                .registry
                .iter()
                .map(|s| SessionSummary {
                    name: s.name.clone(),
                    attached: s.is_attached(),
                    ping_seq: s.ping_seq,
                })
                .collect(),
            history_len: self.history.len(),
        }
    }

    fn roster(&self) -> PresenceRoster {
        let text = self
            .registry
            .attached()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        PresenceRoster {
            ts: Utc::now(),
            html: format!("in room: {text}"),
            text,
        }
    }

    /// Send the roster to everyone attached. Sessions that cannot take it
    /// are detached and the smaller roster is sent again.
    fn broadcast_roster(&mut self) {
        loop {
            let roster = self.roster();
            debug!(text = %roster.text, "broadcasting roster");
            let Some(frame) = encode(&Envelope::Roster(roster)) else {
                return;
            };
            let failed = self.fan_out(&frame, None);
            if failed.is_empty() {
                return;
            }
            for conn in failed {
                let _ = self.unlink(conn, "roster delivery failed");
            }
        }
    }

    /// Offer `frame` to every attached session except `except`. Returns the
    /// connections whose queues refused it.
    fn fan_out(&self, frame: &Arc<String>, except: Option<ConnectionId>) -> Vec<ConnectionId> {
        let mut failed = Vec::new();
        for link in self.registry.attached().filter_map(Session::link) {
            if Some(link.conn()) == except {
                continue;
            }
            if !link.deliver(Outgoing::Frame(Arc::clone(frame))) {
                counter!(OUTBOUND_DROPS_TOTAL).increment(1);
                failed.push(link.conn());
            }
        }
        failed
    }

    fn deliver_to(&self, conn: ConnectionId, item: Outgoing) -> bool {
        let delivered = self
            .registry
            .find_by_conn(conn)
            .and_then(Session::link)
            .is_some_and(|link| link.deliver(item));
        if !delivered {
            counter!(OUTBOUND_DROPS_TOTAL).increment(1);
        }
        delivered
    }

    /// Detach every failed connection, then tell the rest.
    fn settle(&mut self, failed: Vec<ConnectionId>) {
        if failed.is_empty() {
            return;
        }
        for conn in failed {
            let _ = self.unlink(conn, "outbound queue full or closed");
        }
        self.broadcast_roster();
    }

    /// Drop the link for `conn`. `false` if no session currently holds it.
    fn unlink(&mut self, conn: ConnectionId, reason: &'static str) -> bool {
        let Some(session) = self.registry.find_by_conn_mut(conn) else {
            return false;
        };
        let _ = session.take_link();
        info!(name = %session.name, %conn, reason, "session detached");
        true
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_gauges(&self) {
        gauge!(SESSIONS_ATTACHED).set(self.registry.attached_count() as f64);
    }
}

fn encode(envelope: &Envelope) -> Option<Arc<String>> {
    match envelope.encode() {
        Ok(frame) => Some(Arc::new(frame)),
        Err(e) => {
            warn!(kind = envelope.kind(), error = %e, "envelope encoding failed");
            None
        }
    }
}
