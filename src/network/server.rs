//! WebSocket Crash Server
//!
//! Async WebSocket server. Owns the shared table, drives the round loop,
//! and runs the reconciliation and snapshot loops alongside it. Each
//! connection gets an outbound queue that both its request replies and
//! the observer hub write into.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::core::env;
use crate::core::money::DEFAULT_MAX_AMOUNT;
use crate::game::snapshot::SnapshotError;
use crate::game::state::UserId;
use crate::game::table::Table;
use crate::game::tick::{RoundConfig, RoundEngine, Transition};
use crate::network::auth::{authorize, AuthConfig};
use crate::network::hub::{ObserverHub, ObserverId};
use crate::network::locale::Locale;
use crate::network::protocol::{
    CashoutInfo, ClientMessage, ErrorCode, HelloRequest, Notice, ServerMessage, WelcomeInfo,
};
use crate::payments::provider::{PaymentProvider, TonApiProvider};
use crate::payments::reconcile::{ReconcileConfig, Reconciler};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Outbound queue capacity per connection.
    pub outbound_queue: usize,
    /// Default message language.
    pub locale: Locale,
    /// Largest stake or top-up accepted from a client.
    pub max_amount: Decimal,
    /// Ledger snapshot file. No persistence when unset.
    pub snapshot_path: Option<PathBuf>,
    /// Period of the snapshot loop.
    pub snapshot_interval: Duration,
    /// Server version string.
    pub version: String,
    /// Round timing.
    pub round: RoundConfig,
    /// Payment reconciliation.
    pub reconcile: ReconcileConfig,
    /// Token validation.
    pub auth: AuthConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            outbound_queue: 64,
            locale: Locale::En,
            max_amount: DEFAULT_MAX_AMOUNT,
            snapshot_path: None,
            snapshot_interval: Duration::from_secs(30),
            version: env!("CARGO_PKG_VERSION").to_string(),
            round: RoundConfig::default(),
            reconcile: ReconcileConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env::var_or("AVIATOR_BIND_ADDR", defaults.bind_addr),
            max_connections: env::var_or("AVIATOR_MAX_CONNECTIONS", defaults.max_connections),
            outbound_queue: env::var_or("AVIATOR_OUTBOUND_QUEUE", defaults.outbound_queue).max(1),
            locale: env::var_or("AVIATOR_LOCALE", defaults.locale),
            max_amount: env::var_or("AVIATOR_MAX_AMOUNT", defaults.max_amount),
            snapshot_path: env::var_opt("AVIATOR_SNAPSHOT_PATH").map(PathBuf::from),
            snapshot_interval: env::secs_or("AVIATOR_SNAPSHOT_INTERVAL_SECS", defaults.snapshot_interval),
            version: defaults.version,
            round: RoundConfig::from_env(),
            reconcile: ReconcileConfig::from_env(),
            auth: AuthConfig::from_env(),
        }
    }
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// Final snapshot could not be written.
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}

/// Connected client.
struct ConnectedClient {
    /// User bound by hello.
    user_id: Option<UserId>,
    /// Connection time.
    connected_at: Instant,
}

/// Per-connection request state.
struct ConnectionState {
    user_id: Option<UserId>,
    observer_id: Option<ObserverId>,
    locale: Locale,
}

/// State shared by the accept loop, connections and background loops.
struct Shared<P> {
    config: ServerConfig,
    table: Arc<RwLock<Table>>,
    hub: Arc<ObserverHub>,
    reconciler: Option<Reconciler<P>>,
    clients: RwLock<BTreeMap<SocketAddr, ConnectedClient>>,
}

/// The crash game server.
pub struct CrashServer<P = TonApiProvider> {
    shared: Arc<Shared<P>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl<P: PaymentProvider> CrashServer<P> {
    /// Create a server over an existing table. The table's amount limit
    /// is taken from `config.max_amount`.
    pub fn new(config: ServerConfig, table: Table, reconciler: Option<Reconciler<P>>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let table = table.with_max_amount(config.max_amount);

        Self {
            shared: Arc::new(Shared {
                config,
                table: Arc::new(RwLock::new(table)),
                hub: Arc::new(ObserverHub::new()),
                reconciler,
                clients: RwLock::new(BTreeMap::new()),
            }),
            shutdown_tx,
        }
    }

    /// Shared table handle.
    pub fn table(&self) -> Arc<RwLock<Table>> {
        self.shared.table.clone()
    }

    /// Observer hub handle.
    pub fn hub(&self) -> Arc<ObserverHub> {
        self.shared.hub.clone()
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.shared.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on a bound listener until shutdown, then write a final snapshot.
    #[instrument(skip_all)]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        let config = &self.shared.config;
        match listener.local_addr() {
            Ok(addr) => info!("Crash server listening on {}", addr),
            Err(_) => info!("Crash server listening"),
        }

        let round_handle = tokio::spawn(run_round_loop(
            self.shared.table.clone(),
            self.shared.hub.clone(),
            RoundEngine::new(config.round.clone()),
            self.shutdown_tx.subscribe(),
        ));

        let reconcile_handle = if self.shared.reconciler.is_some() {
            let shared = self.shared.clone();
            let shutdown_rx = self.shutdown_tx.subscribe();
            Some(tokio::spawn(async move {
                Self::run_reconcile_loop(shared, shutdown_rx).await;
            }))
        } else {
            info!("Payment reconciliation disabled (no deposit address)");
            None
        };

        let snapshot_handle = config.snapshot_path.clone().map(|path| {
            tokio::spawn(run_snapshot_loop(
                self.shared.table.clone(),
                path,
                config.snapshot_interval,
                self.shutdown_tx.subscribe(),
            ))
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.shared.clients.read().await.len();
                            if clients_count >= config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        let _ = round_handle.await;
        if let Some(handle) = reconcile_handle {
            let _ = handle.await;
        }
        if let Some(handle) = snapshot_handle {
            let _ = handle.await;
        }

        if let Some(path) = &config.snapshot_path {
            save_snapshot(&self.shared.table, path).await?;
            info!("Final snapshot written to {}", path.display());
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let shared = self.shared.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(shared.config.outbound_queue);

            shared.clients.write().await.insert(addr, ConnectedClient {
                user_id: None,
                connected_at: Instant::now(),
            });

            let mut sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            let mut state = ConnectionState {
                user_id: None,
                observer_id: None,
                locale: shared.config.locale,
            };

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let reply = match ClientMessage::from_json(&text) {
                                    Ok(client_msg) => {
                                        Self::handle_client_message(&shared, addr, &mut state, client_msg, &msg_tx).await
                                    }
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        ServerMessage::rejected(ErrorCode::InvalidInput, state.locale)
                                    }
                                };
                                if msg_tx.send(reply).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Binary(_))) => {
                                let reply = ServerMessage::rejected(ErrorCode::InvalidInput, state.locale);
                                if msg_tx.send(reply).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                warn!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            // Cleanup
            if let Some(observer_id) = state.observer_id.take() {
                shared.hub.deregister(observer_id).await;
            }
            drop(msg_tx);
            if tokio::time::timeout(Duration::from_secs(1), &mut sender_task).await.is_err() {
                sender_task.abort();
            }

            if let Some(client) = shared.clients.write().await.remove(&addr) {
                match client.user_id {
                    Some(user) => info!(
                        "Client {} (user {}) left after {:?}",
                        addr,
                        user,
                        client.connected_at.elapsed()
                    ),
                    None => info!("Client {} left without hello", addr),
                }
            }
        });
    }

    /// Route one request and build its reply.
    async fn handle_client_message(
        shared: &Shared<P>,
        addr: SocketAddr,
        state: &mut ConnectionState,
        msg: ClientMessage,
        sender: &mpsc::Sender<ServerMessage>,
    ) -> ServerMessage {
        let locale = state.locale;

        match msg {
            ClientMessage::Hello(hello) => Self::handle_hello(shared, addr, state, hello, sender).await,

            ClientMessage::Ping { timestamp } => ServerMessage::Pong {
                timestamp,
                server_time: Utc::now().timestamp_millis().max(0) as u64,
            },

            msg => match state.user_id {
                Some(user) => Self::handle_user_request(shared, user, locale, msg).await,
                None => ServerMessage::rejected(ErrorCode::NotAuthenticated, locale),
            },
        }
    }

    /// Requests that act on the bound user.
    async fn handle_user_request(
        shared: &Shared<P>,
        user: UserId,
        locale: Locale,
        msg: ClientMessage,
    ) -> ServerMessage {
        match msg {
            ClientMessage::Hello(_) | ClientMessage::Ping { .. } => {
                ServerMessage::rejected(ErrorCode::InvalidInput, locale)
            }

            ClientMessage::Balance => ServerMessage::Balance {
                balance: shared.table.read().await.balance(user),
            },

            ClientMessage::TopUp { amount } => {
                let result = shared.table.write().await.top_up(user, amount);
                match result {
                    Ok(balance) => {
                        debug!("User {} topped up {} (balance {})", user, amount, balance);
                        ServerMessage::ToppedUp { balance, message: locale.notice(Notice::ToppedUp) }
                    }
                    Err(e) => {
                        debug!("Top-up for user {} rejected: {}", user, e);
                        ServerMessage::rejected(ErrorCode::from(&e), locale)
                    }
                }
            }

            ClientMessage::PlaceBet { amount, auto_cashout } => {
                let result = shared.table.write().await.place_bet(user, amount, auto_cashout);
                match result {
                    Ok(receipt) => {
                        debug!("User {} bet {} on round {}", user, receipt.amount, receipt.round_id);
                        ServerMessage::BetAccepted {
                            round_id: receipt.round_id,
                            amount: receipt.amount,
                            balance: receipt.balance,
                            message: locale.notice(Notice::BetAccepted),
                        }
                    }
                    Err(e) => {
                        debug!("Bet from user {} rejected: {}", user, e);
                        ServerMessage::rejected(ErrorCode::from(&e), locale)
                    }
                }
            }

            ClientMessage::Cashout => {
                let result = shared.table.write().await.cashout(user);
                match result {
                    Ok(settlement) => {
                        debug!(
                            "User {} cashed out {} at {}x",
                            user, settlement.payout, settlement.multiplier
                        );
                        ServerMessage::CashedOut(CashoutInfo::from_settlement(&settlement, locale))
                    }
                    Err(e) => {
                        debug!("Cashout for user {} rejected: {}", user, e);
                        ServerMessage::rejected(ErrorCode::from(&e), locale)
                    }
                }
            }

            ClientMessage::Reconcile => match &shared.reconciler {
                None => ServerMessage::rejected(ErrorCode::ReconciliationDisabled, locale),
                Some(reconciler) => match reconciler.run_once(&shared.table).await {
                    Ok(report) => ServerMessage::Reconciled {
                        applied: report.applied,
                        duplicates: report.duplicates,
                        skipped: report.skipped,
                        message: locale.notice(Notice::Reconciled),
                    },
                    Err(e) => {
                        warn!("Reconciliation requested by user {} failed: {}", user, e);
                        ServerMessage::rejected(ErrorCode::from(&e), locale)
                    }
                },
            },

            ClientMessage::History => ServerMessage::History {
                rounds: shared.table.read().await.history(),
            },
        }
    }

    /// Bind the connection to a user and start observing.
    async fn handle_hello(
        shared: &Shared<P>,
        addr: SocketAddr,
        state: &mut ConnectionState,
        hello: HelloRequest,
        sender: &mpsc::Sender<ServerMessage>,
    ) -> ServerMessage {
        let locale = hello.locale.unwrap_or(state.locale);

        let user = match authorize(hello.user_id, hello.token.as_deref(), &shared.config.auth) {
            Ok(user) => user,
            Err(e) => {
                warn!("Hello from {} as user {} rejected: {}", addr, hello.user_id, e);
                return ServerMessage::rejected(ErrorCode::from(&e), locale);
            }
        };

        if let Some(previous) = state.observer_id.take() {
            shared.hub.deregister(previous).await;
        }
        state.observer_id = Some(shared.hub.register(user, locale, sender.clone()).await);
        state.user_id = Some(user);
        state.locale = locale;

        if let Some(client) = shared.clients.write().await.get_mut(&addr) {
            client.user_id = Some(user);
        }
        info!("Client {} bound to user {}", addr, user);

        let round = shared.table.read().await.round().view();
        ServerMessage::Welcome(WelcomeInfo {
            user_id: user,
            server_version: shared.config.version.clone(),
            round,
        })
    }

    /// Run the reconciliation pass on its interval until shutdown.
    async fn run_reconcile_loop(shared: Arc<Shared<P>>, mut shutdown_rx: broadcast::Receiver<()>) {
        let Some(reconciler) = &shared.reconciler else {
            return;
        };
        let period = shared.config.reconcile.interval.max(Duration::from_secs(1));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match reconciler.run_once(&shared.table).await {
                        Ok(report) if report.applied > 0 => info!(
                            "Reconciliation applied {} payments ({} duplicates, {} skipped)",
                            report.applied, report.duplicates, report.skipped
                        ),
                        Ok(_) => {}
                        Err(e) => warn!("Reconciliation cycle skipped: {}", e),
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.shared.clients.read().await.len()
    }
}

/// Drive the round engine until shutdown.
///
/// The table lock is held only for each `advance`; events are published
/// after it is released.
pub async fn run_round_loop(
    table: Arc<RwLock<Table>>,
    hub: Arc<ObserverHub>,
    mut engine: RoundEngine,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut transition = {
        let mut table = table.write().await;
        engine.open_betting(&mut table)
    };
    let mut deadline = Instant::now();

    loop {
        let delay = transition.next_delay;
        publish_transition(&hub, transition).await;

        // Late wakeups shorten the next sleep instead of accumulating drift.
        deadline = (deadline + delay).max(Instant::now());
        tokio::select! {
            _ = sleep_until(deadline) => {}
            _ = shutdown_rx.recv() => {
                info!("Round loop stopped");
                break;
            }
        }

        transition = {
            let mut table = table.write().await;
            engine.advance(&mut table)
        };
    }
}

async fn publish_transition(hub: &ObserverHub, transition: Transition) {
    for event in transition.events {
        hub.publish(&ServerMessage::Round(event)).await;
    }
    for settlement in &transition.settlements {
        hub.send_to_user(settlement.user_id, |locale| {
            ServerMessage::CashedOut(CashoutInfo::from_settlement(settlement, locale))
        })
        .await;
    }
}

/// Write the ledger snapshot. The table is only read-locked for the capture.
pub async fn save_snapshot(table: &RwLock<Table>, path: &Path) -> Result<(), SnapshotError> {
    let snapshot = table.read().await.snapshot();
    snapshot.save(path).await?;
    debug!(
        "Snapshot written: {} accounts, {} processed payments",
        snapshot.account_count(),
        snapshot.processed_count()
    );
    Ok(())
}

async fn run_snapshot_loop(
    table: Arc<RwLock<Table>>,
    path: PathBuf,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = interval(period.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick fires immediately; nothing to save yet.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = save_snapshot(&table, &path).await {
                    error!("Snapshot to {} failed: {}", path.display(), e);
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::bets::Resolution;
    use crate::game::events::RoundEvent;
    use crate::game::state::RoundPhase;
    use crate::game::table::TableError;
    use crate::network::auth::tests::{create_test_token, test_claims, SECRET};
    use crate::payments::reconcile::tests::{deposit, FakeProvider};
    use rand::{Rng, SeedableRng};
    use rust_decimal_macros::dec;
    use tokio_tungstenite::connect_async;

    fn fast_rounds() -> RoundConfig {
        RoundConfig {
            betting_window: Duration::from_millis(20),
            tick_interval: Duration::from_millis(2),
            crash_pause: Duration::from_millis(10),
            crash_min: dec!(1.05),
            crash_max: dec!(1.05),
            rng_seed: Some(9),
            ..Default::default()
        }
    }

    fn test_server(reconciler: Option<Reconciler<FakeProvider>>) -> CrashServer<FakeProvider> {
        let config = ServerConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            round: fast_rounds(),
            ..Default::default()
        };
        CrashServer::new(config, Table::new(5), reconciler)
    }

    fn connection() -> (ConnectionState, mpsc::Sender<ServerMessage>, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(256);
        let state = ConnectionState { user_id: None, observer_id: None, locale: Locale::En };
        (state, tx, rx)
    }

    fn addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40000))
    }

    async fn request(
        server: &CrashServer<FakeProvider>,
        state: &mut ConnectionState,
        tx: &mpsc::Sender<ServerMessage>,
        msg: ClientMessage,
    ) -> ServerMessage {
        CrashServer::<FakeProvider>::handle_client_message(&server.shared, addr(), state, msg, tx).await
    }

    fn hello(user: i64) -> ClientMessage {
        ClientMessage::Hello(HelloRequest { user_id: UserId(user), token: None, locale: None })
    }

    fn rejection_code(msg: &ServerMessage) -> Option<ErrorCode> {
        match msg {
            ServerMessage::Rejected(err) => Some(err.code),
            _ => None,
        }
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.max_amount, DEFAULT_MAX_AMOUNT);
        assert_eq!(config.bind_addr.port(), 8080);
        assert!(config.snapshot_path.is_none());
        assert!(!config.reconcile.is_enabled());
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = test_server(None);
        assert_eq!(server.connection_count().await, 0);
        assert_eq!(server.hub().observer_count().await, 0);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_requests_before_hello_rejected() {
        let server = test_server(None);
        let (mut state, tx, _rx) = connection();

        let reply = request(&server, &mut state, &tx, ClientMessage::Balance).await;
        assert_eq!(rejection_code(&reply), Some(ErrorCode::NotAuthenticated));

        let reply = request(&server, &mut state, &tx, ClientMessage::Ping { timestamp: 5 }).await;
        assert!(matches!(reply, ServerMessage::Pong { timestamp: 5, .. }));
    }

    #[tokio::test]
    async fn test_hello_registers_observer() {
        let server = test_server(None);
        let (mut state, tx, _rx) = connection();

        let reply = request(&server, &mut state, &tx, hello(42)).await;
        match reply {
            ServerMessage::Welcome(info) => {
                assert_eq!(info.user_id, UserId(42));
                assert_eq!(info.round.phase, RoundPhase::Waiting);
                assert_eq!(info.round.crash_point, None);
            }
            other => panic!("Wrong reply: {:?}", other),
        }
        assert_eq!(server.hub().observer_count().await, 1);

        // A second hello replaces the observer.
        request(&server, &mut state, &tx, hello(42)).await;
        assert_eq!(server.hub().observer_count().await, 1);
    }

    #[tokio::test]
    async fn test_hello_requires_token_when_configured() {
        let config = ServerConfig {
            auth: AuthConfig { secret: Some(SECRET.into()), ..Default::default() },
            ..Default::default()
        };
        let server: CrashServer<FakeProvider> = CrashServer::new(config, Table::new(5), None);
        let (mut state, tx, _rx) = connection();

        let reply = request(&server, &mut state, &tx, hello(42)).await;
        assert_eq!(rejection_code(&reply), Some(ErrorCode::AuthFailed));
        assert!(state.user_id.is_none());

        let token = create_test_token(&test_claims("42"), SECRET);
        let msg = ClientMessage::Hello(HelloRequest { user_id: UserId(42), token: Some(token), locale: None });
        let reply = request(&server, &mut state, &tx, msg).await;
        assert!(matches!(reply, ServerMessage::Welcome(_)));
        assert_eq!(state.user_id, Some(UserId(42)));
    }

    #[tokio::test]
    async fn test_bet_and_cashout_flow() {
        let server = test_server(None);
        let (mut state, tx, _rx) = connection();
        request(&server, &mut state, &tx, hello(1)).await;

        let reply = request(&server, &mut state, &tx, ClientMessage::TopUp { amount: dec!(100) }).await;
        assert!(matches!(reply, ServerMessage::ToppedUp { balance, .. } if balance == dec!(100)));

        let bet = ClientMessage::PlaceBet { amount: dec!(20), auto_cashout: None };
        let reply = request(&server, &mut state, &tx, bet.clone()).await;
        assert!(matches!(reply, ServerMessage::BetAccepted { balance, .. } if balance == dec!(80)));

        let reply = request(&server, &mut state, &tx, bet).await;
        assert_eq!(rejection_code(&reply), Some(ErrorCode::DuplicateBet));

        let reply = request(&server, &mut state, &tx, ClientMessage::Cashout).await;
        assert_eq!(rejection_code(&reply), Some(ErrorCode::NotInFlight));

        {
            let table = server.table();
            let mut table = table.write().await;
            let mut engine = RoundEngine::new(RoundConfig { rng_seed: Some(1), ..Default::default() });
            engine.advance(&mut table);
            table.round.crash_point = dec!(2.50);
            while table.round().multiplier < dec!(1.53) {
                engine.advance(&mut table);
            }
        }

        let reply = request(&server, &mut state, &tx, ClientMessage::Cashout).await;
        match reply {
            ServerMessage::CashedOut(info) => {
                assert_eq!(info.payout, dec!(30.60));
                assert_eq!(info.balance, dec!(110.60));
                assert!(!info.auto);
                assert_eq!(info.message, "Cashout successful! Won: 30.60");
            }
            other => panic!("Wrong reply: {:?}", other),
        }

        let reply = request(&server, &mut state, &tx, ClientMessage::Cashout).await;
        assert_eq!(rejection_code(&reply), Some(ErrorCode::AlreadyCashedOut));

        let reply = request(&server, &mut state, &tx, ClientMessage::Balance).await;
        assert_eq!(reply, ServerMessage::Balance { balance: dec!(110.60) });
    }

    #[tokio::test]
    async fn test_rejections_are_localized() {
        let server = test_server(None);
        let (mut state, tx, _rx) = connection();
        let msg = ClientMessage::Hello(HelloRequest { user_id: UserId(3), token: None, locale: Some(Locale::Kk) });
        request(&server, &mut state, &tx, msg).await;

        let reply = request(&server, &mut state, &tx, ClientMessage::PlaceBet { amount: dec!(5), auto_cashout: None }).await;
        match reply {
            ServerMessage::Rejected(err) => {
                assert_eq!(err.code, ErrorCode::InsufficientFunds);
                assert_eq!(err.message, "Жеткілікті баланс жоқ");
            }
            other => panic!("Wrong reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_oversized_amounts_rejected() {
        let config = ServerConfig { max_amount: dec!(100), round: fast_rounds(), ..Default::default() };
        let server: CrashServer<FakeProvider> = CrashServer::new(config, Table::new(5), None);
        let (mut state, tx, _rx) = connection();
        request(&server, &mut state, &tx, hello(1)).await;

        let reply = request(&server, &mut state, &tx, ClientMessage::TopUp { amount: Decimal::MAX }).await;
        assert_eq!(rejection_code(&reply), Some(ErrorCode::AmountTooLarge));

        request(&server, &mut state, &tx, ClientMessage::TopUp { amount: dec!(100) }).await;
        request(&server, &mut state, &tx, ClientMessage::TopUp { amount: dec!(100) }).await;
        let bet = ClientMessage::PlaceBet { amount: dec!(150), auto_cashout: Some(dec!(1.01)) };
        let reply = request(&server, &mut state, &tx, bet).await;
        assert_eq!(rejection_code(&reply), Some(ErrorCode::AmountTooLarge));

        let reply = request(&server, &mut state, &tx, ClientMessage::Balance).await;
        assert_eq!(reply, ServerMessage::Balance { balance: dec!(200) });
    }

    #[tokio::test]
    async fn test_reconcile_request() {
        let disabled = test_server(None);
        let (mut state, tx, _rx) = connection();
        request(&disabled, &mut state, &tx, hello(42)).await;
        let reply = request(&disabled, &mut state, &tx, ClientMessage::Reconcile).await;
        assert_eq!(rejection_code(&reply), Some(ErrorCode::ReconciliationDisabled));

        let provider = FakeProvider::new(vec![deposit("tx123", "user_42", 5_000_000_000)]);
        let server = test_server(Some(Reconciler::new(provider, "user_")));
        let (mut state, tx, _rx) = connection();
        request(&server, &mut state, &tx, hello(42)).await;

        let reply = request(&server, &mut state, &tx, ClientMessage::Reconcile).await;
        assert!(matches!(reply, ServerMessage::Reconciled { applied: 1, duplicates: 0, .. }));
        let reply = request(&server, &mut state, &tx, ClientMessage::Reconcile).await;
        assert!(matches!(reply, ServerMessage::Reconciled { applied: 0, duplicates: 1, .. }));

        let reply = request(&server, &mut state, &tx, ClientMessage::Balance).await;
        assert_eq!(reply, ServerMessage::Balance { balance: dec!(5) });
    }

    #[tokio::test]
    async fn test_round_loop_publishes_in_order() {
        let table = Arc::new(RwLock::new(Table::new(5)));
        let hub = Arc::new(ObserverHub::new());
        let (tx, mut rx) = mpsc::channel(1024);
        hub.register(UserId(1), Locale::En, tx).await;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_round_loop(
            table.clone(),
            hub.clone(),
            RoundEngine::new(fast_rounds()),
            shutdown_rx,
        ));

        let mut names = Vec::new();
        let mut crashes = 0;
        while crashes < 2 {
            let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("round loop stalled")
                .expect("hub closed");
            if let ServerMessage::Round(event) = msg {
                if matches!(event, RoundEvent::Crash { .. }) {
                    crashes += 1;
                }
                names.push(event.name());
            }
        }
        let _ = shutdown_tx.send(());
        handle.await.unwrap();

        // waiting, start, 5 updates (1.01..1.05), crash; twice
        let round: Vec<&str> = ["waiting", "start"]
            .into_iter()
            .chain(std::iter::repeat("update").take(5))
            .chain(["crash"])
            .collect();
        assert_eq!(names, [round.clone(), round].concat());
        assert_eq!(table.read().await.history().len(), 2);
    }

    #[tokio::test]
    async fn test_auto_cashout_notifies_owner() {
        let table = Arc::new(RwLock::new(Table::new(5)));
        let hub = Arc::new(ObserverHub::new());
        let (tx, mut rx) = mpsc::channel(1024);
        hub.register(UserId(4), Locale::En, tx).await;

        let mut config = fast_rounds();
        config.crash_min = dec!(1.50);
        config.crash_max = dec!(1.50);
        config.betting_window = Duration::from_millis(200);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_round_loop(table.clone(), hub.clone(), RoundEngine::new(config), shutdown_rx));

        // Bet during the first betting window.
        loop {
            let msg = rx.recv().await.unwrap();
            if matches!(msg, ServerMessage::Round(RoundEvent::Waiting { .. })) {
                let mut table = table.write().await;
                table.top_up(UserId(4), dec!(10)).unwrap();
                table.place_bet(UserId(4), dec!(10), Some(dec!(1.10))).unwrap();
                break;
            }
        }

        let info = loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("no auto-cashout")
                .unwrap();
            if let ServerMessage::CashedOut(info) = msg {
                break info;
            }
        };
        let _ = shutdown_tx.send(());
        handle.await.unwrap();

        assert!(info.auto);
        assert_eq!(info.multiplier, dec!(1.10));
        assert_eq!(info.payout, dec!(11.00));
        assert_eq!(table.read().await.balance(UserId(4)), dec!(11));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cashout_and_crash_resolve_each_bet_once() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);

        for iteration in 0..50u64 {
            let user = UserId(1);
            let table = Arc::new(RwLock::new(Table::new(4)));
            let mut engine = RoundEngine::new(RoundConfig {
                rng_seed: Some(iteration),
                crash_min: dec!(1.02),
                crash_max: dec!(1.10),
                ..Default::default()
            });
            {
                let mut table = table.write().await;
                table.top_up(user, dec!(100)).unwrap();
                engine.open_betting(&mut table);
                table.place_bet(user, dec!(10), None).unwrap();
                engine.advance(&mut table);
            }

            let engine_task = tokio::spawn({
                let table = table.clone();
                async move {
                    loop {
                        tokio::task::yield_now().await;
                        let mut table = table.write().await;
                        engine.advance(&mut table);
                        if table.round().phase == RoundPhase::Crashed {
                            break;
                        }
                    }
                }
            });

            let mut cashers = Vec::new();
            for _ in 0..4 {
                let table = table.clone();
                let head_start: u32 = rng.gen_range(0..12);
                cashers.push(tokio::spawn(async move {
                    for _ in 0..head_start {
                        tokio::task::yield_now().await;
                    }
                    table.write().await.cashout(user)
                }));
            }

            engine_task.await.unwrap();
            let mut payouts = Vec::new();
            for casher in cashers {
                match casher.await.unwrap() {
                    Ok(settlement) => payouts.push(settlement.payout),
                    Err(e) => assert!(matches!(e, TableError::AlreadyCashedOut | TableError::TooLate), "{e}"),
                }
            }

            let table = table.read().await;
            assert!(payouts.len() <= 1, "bet settled {} times", payouts.len());
            match table.bets().resolution(user) {
                Some(Resolution::CashedOut { payout, .. }) => {
                    assert_eq!(payouts, vec![payout]);
                    assert_eq!(table.balance(user), dec!(90) + payout);
                }
                Some(Resolution::Forfeited) => {
                    assert!(payouts.is_empty());
                    assert_eq!(table.balance(user), dec!(90));
                }
                None => panic!("bet never resolved"),
            }
            assert!(table.bets().is_empty());
        }
    }

    #[tokio::test]
    async fn test_websocket_end_to_end() {
        let server = Arc::new(test_server(None));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let serving = tokio::spawn({
            let server = server.clone();
            async move { server.serve(listener).await }
        });

        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();

        async fn next_reply<S>(ws: &mut S) -> ServerMessage
        where
            S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
        {
            loop {
                let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
                    .await
                    .expect("no reply")
                    .expect("socket closed")
                    .unwrap();
                if let Message::Text(text) = frame {
                    let msg = ServerMessage::from_json(&text).unwrap();
                    if !matches!(msg, ServerMessage::Round(_)) {
                        return msg;
                    }
                }
            }
        }

        ws.send(Message::Text(r#"{"type":"balance"}"#.into())).await.unwrap();
        assert_eq!(rejection_code(&next_reply(&mut ws).await), Some(ErrorCode::NotAuthenticated));

        ws.send(Message::Text(r#"{"type":"hello","user_id":9}"#.into())).await.unwrap();
        assert!(matches!(next_reply(&mut ws).await, ServerMessage::Welcome(_)));

        ws.send(Message::Text(r#"{"type":"top_up","amount":"12.5"}"#.into())).await.unwrap();
        assert!(matches!(next_reply(&mut ws).await, ServerMessage::ToppedUp { balance, .. } if balance == dec!(12.5)));

        ws.send(Message::Text("garbage".into())).await.unwrap();
        assert_eq!(rejection_code(&next_reply(&mut ws).await), Some(ErrorCode::InvalidInput));

        assert_eq!(server.connection_count().await, 1);

        server.shutdown();
        assert!(matches!(next_reply(&mut ws).await, ServerMessage::Shutdown { .. }));
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_save_snapshot() {
        let path = std::env::temp_dir().join(format!("aviator-server-{}.bin", uuid::Uuid::new_v4()));
        let table = RwLock::new(Table::new(5));
        table.write().await.top_up(UserId(5), dec!(3)).unwrap();

        save_snapshot(&table, &path).await.unwrap();
        let restored = crate::game::snapshot::LedgerSnapshot::load(&path).await.unwrap().unwrap();
        assert_eq!(Table::restore(restored, 5).balance(UserId(5)), dec!(3));

        let _ = tokio::fs::remove_file(&path).await;
    }
}
