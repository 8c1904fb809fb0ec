//! Emulator Instance Manager
//!
//! The orchestrator. Given a (platform, version, display) request it
//! reuses what is already running, spawns what is missing in dependency
//! order (device emulator, bridge runtime, relay), waits for the firmware
//! to report readiness on its serial console, and persists the result.
//! Recorded state is never trusted over live OS process state: stale pids
//! are discarded and re-derived, not surfaced.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, warn};

use wristkit_core::{Platform, ToolConfig, ToolPaths};

use crate::ports;
use crate::state::{EmulatorState, InstanceRecord, StateError, StateStore};
use crate::supervisor::{self, ProcessStamp, SupervisorError};
use crate::{BOOT_MARKERS, DISPLAY_PORT, RELAY_LISTEN_PORT};

/// Orchestration errors
#[derive(Debug, thiserror::Error)]
pub enum EmulatorError {
    #[error(transparent)]
    Spawn(#[from] SupervisorError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Firmware image not found: {0} (is SDK {1} installed?)")]
    MissingImage(PathBuf, String),

    #[error("{platform} {version} did not boot within {timeout_secs}s")]
    BootTimeout {
        platform: Platform,
        version: String,
        timeout_secs: u64,
    },

    #[error("Remote display is already in use by {platform} {version}")]
    DisplayConflict { platform: Platform, version: String },

    #[error("Processes for {platform} {version} did not exit")]
    StopTimeout { platform: Platform, version: String },

    #[error("Cannot wipe {platform} {version} while its emulator is running")]
    WipeWhileRunning { platform: Platform, version: String },
}

/// What a caller needs to reach a running instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub platform: Platform,
    pub version: String,
    /// Bridge-runtime WebSocket port; the transport connects here.
    pub runtime_port: u16,
    /// Device-emulator protocol port
    pub qemu_port: u16,
    /// Serial-console port
    pub console_port: u16,
}

/// Liveness of one recorded child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessStatus {
    pub pid: Option<u32>,
    pub alive: bool,
}

impl ProcessStatus {
    fn probe(stamp: &Option<ProcessStamp>) -> Self {
        Self {
            pid: stamp.as_ref().map(|s| s.pid),
            alive: stamp.as_ref().is_some_and(supervisor::is_alive),
        }
    }
}

/// Point-in-time view of one recorded instance.
#[derive(Debug, Clone)]
pub struct InstanceStatus {
    pub platform: Platform,
    pub version: String,
    pub display: bool,
    pub runtime_port: u16,
    pub qemu: ProcessStatus,
    pub runtime: ProcessStatus,
    pub relay: Option<ProcessStatus>,
}

impl InstanceStatus {
    fn from_record(platform: Platform, version: &str, record: &InstanceRecord) -> Self {
        Self {
            platform,
            version: version.to_string(),
            display: record.display,
            runtime_port: record.runtime_port,
            qemu: ProcessStatus::probe(&record.qemu),
            runtime: ProcessStatus::probe(&record.runtime),
            relay: record.display.then(|| ProcessStatus::probe(&record.relay)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.qemu.alive && self.runtime.alive
    }

    pub fn label(&self) -> &'static str {
        match (self.qemu.alive, self.runtime.alive) {
            (true, true) => "RUNNING",
            (false, false) => "STOPPED",
            _ => "DEGRADED",
        }
    }
}

/// Orchestrates the emulator process group for each (platform, version).
pub struct EmulatorManager {
    config: ToolConfig,
    paths: ToolPaths,
    store: StateStore,
}

impl EmulatorManager {
    pub fn new(config: ToolConfig) -> Self {
        Self::with_paths(config, ToolPaths::new())
    }

    /// Manager rooted at an explicit tool home.
    pub fn with_paths(config: ToolConfig, paths: ToolPaths) -> Self {
        let store = StateStore::new(paths.state_file());
        Self {
            config,
            paths,
            store,
        }
    }

    /// Ensure an instance for (platform, version) is running with the
    /// requested display mode, reusing live processes where possible, and
    /// return the endpoint the transport should connect to.
    pub async fn ensure_running(
        &self,
        platform: Platform,
        version: &str,
        display: bool,
    ) -> Result<Endpoint, EmulatorError> {
        let mut state = self.store.load()?;

        if let Some(existing) = state.get(platform, version).cloned() {
            if let Some(endpoint) = self
                .reconcile(platform, version, display, existing, &mut state)
                .await?
            {
                return Ok(endpoint);
            }
            // Fell back to ABSENT. Persist the pruned state now so the
            // file stops describing dead processes even if the restart
            // below fails.
            self.store.save(&state)?;
        }

        // The display channel is a singleton; refuse before spawning
        // anything.
        if display {
            if let Some((owner, owner_version)) = display_owner(&state, platform, version) {
                return Err(EmulatorError::DisplayConflict {
                    platform: owner,
                    version: owner_version,
                });
            }
        }

        // The device emulator's three ports are allocated together, before
        // it is spawned.
        let qemu_port = ports::allocate()?;
        let console_port = ports::allocate()?;
        let gdb_port = ports::allocate()?;
        let runtime_port = ports::allocate()?;

        let qemu = self.spawn_qemu(platform, version, qemu_port, console_port, gdb_port, display)?;

        if let Err(err) = self.wait_for_boot(platform, version, console_port).await {
            warn!("{} {} failed to boot: {}", platform, version, err);
            supervisor::terminate(&qemu, true);
            return Err(err);
        }

        let runtime = match self.spawn_runtime(platform, version, qemu_port, runtime_port) {
            Ok(stamp) => stamp,
            Err(err) => {
                supervisor::terminate(&qemu, true);
                return Err(err);
            }
        };

        let relay = if display {
            match self.spawn_relay() {
                Ok(stamp) => Some(stamp),
                Err(err) => {
                    supervisor::terminate(&runtime, true);
                    supervisor::terminate(&qemu, true);
                    return Err(err.into());
                }
            }
        } else {
            None
        };

        let record = InstanceRecord {
            qemu_port,
            console_port,
            gdb_port,
            runtime_port,
            display,
            qemu: Some(qemu),
            runtime: Some(runtime),
            relay,
        };
        state.insert(platform, version, record);
        self.store.save(&state)?;

        info!(
            "{} {} is up (runtime port {})",
            platform, version, runtime_port
        );
        Ok(Endpoint {
            platform,
            version: version.to_string(),
            runtime_port,
            qemu_port,
            console_port,
        })
    }

    /// Try to reuse an existing record. Returns the endpoint when the
    /// instance is (made) usable, or `None` after pruning a record that
    /// must be rebuilt from scratch.
    async fn reconcile(
        &self,
        platform: Platform,
        version: &str,
        display: bool,
        existing: InstanceRecord,
        state: &mut EmulatorState,
    ) -> Result<Option<Endpoint>, EmulatorError> {
        let qemu_alive = existing.qemu.as_ref().is_some_and(supervisor::is_alive);

        if !qemu_alive {
            // A dead device emulator invalidates its dependents; anything
            // still running is orphaned and gets stopped here.
            debug!("Discarding stale record for {} {}", platform, version);
            for stamp in [&existing.relay, &existing.runtime].into_iter().flatten() {
                supervisor::terminate(stamp, false);
            }
            state.remove(platform, version);
            return Ok(None);
        }

        if existing.display != display {
            // The display flag is fixed at emulator boot; a mismatch means
            // full teardown and restart.
            info!(
                "{} {} display mode changed, restarting emulator",
                platform, version
            );
            self.stop_record(platform, version, &existing, false).await?;
            state.remove(platform, version);
            return Ok(None);
        }

        let mut record = existing;

        if !record.runtime.as_ref().is_some_and(supervisor::is_alive) {
            // Respawn only the bridge runtime, pointed at the live
            // emulator. Its old port may have been taken meanwhile.
            info!("Respawning bridge runtime for {} {}", platform, version);
            let runtime_port = ports::allocate()?;
            record.runtime_port = runtime_port;
            record.runtime =
                Some(self.spawn_runtime(platform, version, record.qemu_port, runtime_port)?);
        }

        if record.display && !record.relay.as_ref().is_some_and(supervisor::is_alive) {
            info!("Respawning display relay for {} {}", platform, version);
            record.relay = Some(self.spawn_relay()?);
        }

        let endpoint = Endpoint {
            platform,
            version: version.to_string(),
            runtime_port: record.runtime_port,
            qemu_port: record.qemu_port,
            console_port: record.console_port,
        };
        state.insert(platform, version, record);
        self.store.save(state)?;
        Ok(Some(endpoint))
    }

    /// Stop the instance and remove it from the store. Stopping an
    /// unknown instance is a no-op.
    pub async fn stop(
        &self,
        platform: Platform,
        version: &str,
        forceful: bool,
    ) -> Result<(), EmulatorError> {
        let mut state = self.store.load()?;
        let Some(record) = state.get(platform, version).cloned() else {
            info!("{} {} is not running", platform, version);
            return Ok(());
        };

        self.stop_record(platform, version, &record, forceful).await?;
        state.remove(platform, version);
        self.store.save(&state)?;
        info!("Stopped {} {}", platform, version);
        Ok(())
    }

    /// Terminate a record's processes in reverse dependency order (relay,
    /// runtime, emulator) and wait until all report not-alive, escalating
    /// to SIGKILL when a graceful stop stalls.
    async fn stop_record(
        &self,
        platform: Platform,
        version: &str,
        record: &InstanceRecord,
        forceful: bool,
    ) -> Result<(), EmulatorError> {
        let stamps: Vec<ProcessStamp> = [&record.relay, &record.runtime, &record.qemu]
            .into_iter()
            .flatten()
            .copied()
            .collect();

        for stamp in &stamps {
            supervisor::terminate(stamp, forceful);
        }

        let mut escalated = forceful;
        let mut deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if !stamps.iter().any(supervisor::is_alive) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                if escalated {
                    return Err(EmulatorError::StopTimeout {
                        platform,
                        version: version.to_string(),
                    });
                }
                warn!("{} {} ignored SIGTERM, escalating", platform, version);
                for stamp in &stamps {
                    supervisor::terminate(stamp, true);
                }
                escalated = true;
                deadline = Instant::now() + Duration::from_secs(5);
            }
            sleep(Duration::from_millis(100)).await;
        }
    }

    /// Status of every recorded instance, live or not.
    pub fn list(&self) -> Result<Vec<InstanceStatus>, EmulatorError> {
        let state = self.store.load()?;
        Ok(state
            .iter()
            .map(|(platform, version, record)| InstanceStatus::from_record(platform, version, record))
            .collect())
    }

    /// Instances whose device emulator and runtime are both alive.
    pub fn list_running(&self) -> Result<Vec<InstanceStatus>, EmulatorError> {
        Ok(self.list()?.into_iter().filter(|s| s.is_running()).collect())
    }

    /// Remove the persisted storage of one instance. Refuses while any of
    /// its processes are alive.
    pub fn wipe(&self, platform: Platform, version: &str) -> Result<(), EmulatorError> {
        let state = self.store.load()?;
        if let Some(record) = state.get(platform, version) {
            if record_is_live(record) {
                return Err(EmulatorError::WipeWhileRunning {
                    platform,
                    version: version.to_string(),
                });
            }
        }

        let dir = self.paths.persist_dir(platform, version);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
            info!("Wiped {} {} data at {:?}", platform, version, dir);
        }
        Ok(())
    }

    /// Remove all persisted storage for every version. Refuses while any
    /// instance is live.
    pub fn wipe_all(&self) -> Result<(), EmulatorError> {
        let state = self.store.load()?;
        for (platform, version, record) in state.iter() {
            if record_is_live(record) {
                return Err(EmulatorError::WipeWhileRunning {
                    platform,
                    version: version.to_string(),
                });
            }
        }

        let root = self.paths.persist_root();
        if root.exists() {
            std::fs::remove_dir_all(&root)?;
            info!("Wiped all emulator data at {:?}", root);
        }
        Ok(())
    }

    /// Stop every recorded instance.
    pub async fn kill_all(&self, forceful: bool) -> Result<(), EmulatorError> {
        let mut state = self.store.load()?;
        let entries: Vec<(Platform, String, InstanceRecord)> = state
            .iter()
            .map(|(p, v, r)| (p, v.to_string(), r.clone()))
            .collect();

        for (platform, version, record) in entries {
            if let Err(err) = self.stop_record(platform, &version, &record, forceful).await {
                // Keep the file honest about the instances already removed.
                self.store.save(&state)?;
                return Err(err);
            }
            state.remove(platform, &version);
            info!("Stopped {} {}", platform, version);
        }
        self.store.save(&state)?;
        Ok(())
    }

    fn spawn_qemu(
        &self,
        platform: Platform,
        version: &str,
        qemu_port: u16,
        console_port: u16,
        gdb_port: u16,
        display: bool,
    ) -> Result<ProcessStamp, EmulatorError> {
        let spec = platform.spec();
        let image_dir =
            self.paths
                .qemu_image_dir(&self.config.sdk_root(&self.paths), platform, version);

        let micro_flash = image_dir.join(spec.micro_flash);
        if !micro_flash.exists() {
            return Err(EmulatorError::MissingImage(micro_flash, version.to_string()));
        }

        let mut args: Vec<String> = vec![
            "-rtc".into(),
            "base=localtime".into(),
            "-serial".into(),
            "null".into(),
            "-serial".into(),
            format!("tcp::{},server,nowait", qemu_port),
            // No `nowait`: boot stalls until our readiness poll connects,
            // so no marker is missed.
            "-serial".into(),
            format!("tcp::{},server", console_port),
            "-gdb".into(),
            format!("tcp::{},server,nowait", gdb_port),
            "-machine".into(),
            spec.machine.into(),
            "-cpu".into(),
            spec.cpu.into(),
            "-pflash".into(),
            micro_flash.display().to_string(),
        ];

        if let Some(spi) = spec.spi_flash {
            let spi_flash = image_dir.join(spi);
            if !spi_flash.exists() {
                return Err(EmulatorError::MissingImage(spi_flash, version.to_string()));
            }
            args.push("-mtdblock".into());
            args.push(spi_flash.display().to_string());
        }

        if display {
            args.push("-vnc".into());
            args.push(format!(":{}", DISPLAY_PORT - 5900));
        } else {
            args.push("-display".into());
            args.push("none".into());
        }

        Ok(supervisor::spawn_detached(
            &self.config.qemu_binary,
            &args,
            &[],
        )?)
    }

    fn spawn_runtime(
        &self,
        platform: Platform,
        version: &str,
        qemu_port: u16,
        runtime_port: u16,
    ) -> Result<ProcessStamp, EmulatorError> {
        let persist = self.paths.persist_dir(platform, version);
        std::fs::create_dir_all(&persist)?;

        let mut args: Vec<String> = vec![
            "--qemu".into(),
            format!("127.0.0.1:{}", qemu_port),
            "--port".into(),
            runtime_port.to_string(),
            "--persist".into(),
            persist.display().to_string(),
        ];

        // Logged-in users get their token forwarded; absence is normal.
        if let Ok(token) = std::fs::read_to_string(self.paths.token_file()) {
            let token = token.trim();
            if !token.is_empty() {
                args.push("--token".into());
                args.push(token.to_string());
            }
        }

        Ok(supervisor::spawn_detached(
            &self.config.runtime_binary,
            &args,
            &[],
        )?)
    }

    fn spawn_relay(&self) -> Result<ProcessStamp, SupervisorError> {
        let args: Vec<String> = vec![
            RELAY_LISTEN_PORT.to_string(),
            format!("127.0.0.1:{}", DISPLAY_PORT),
        ];
        supervisor::spawn_detached(&self.config.relay_binary, &args, &[])
    }

    /// Poll the serial console until the firmware prints a boot marker,
    /// reconnecting as needed, bounded by the configured timeout.
    async fn wait_for_boot(
        &self,
        platform: Platform,
        version: &str,
        console_port: u16,
    ) -> Result<(), EmulatorError> {
        let timeout_secs = self.config.boot_timeout_secs;
        let deadline = Instant::now() + Duration::from_secs(timeout_secs);
        let timed_out = || EmulatorError::BootTimeout {
            platform,
            version: version.to_string(),
            timeout_secs,
        };

        debug!(
            "Waiting up to {}s for {} {} to boot",
            timeout_secs, platform, version
        );

        let mut tail = String::new();
        'reconnect: loop {
            if Instant::now() >= deadline {
                return Err(timed_out());
            }

            let mut stream =
                match timeout_at(deadline, TcpStream::connect(("127.0.0.1", console_port))).await {
                    Err(_) => return Err(timed_out()),
                    Ok(Err(_)) => {
                        sleep(Duration::from_millis(200)).await;
                        continue;
                    }
                    Ok(Ok(stream)) => stream,
                };

            let mut buf = [0u8; 1024];
            loop {
                match timeout_at(deadline, stream.read(&mut buf)).await {
                    Err(_) => return Err(timed_out()),
                    Ok(Ok(0)) | Ok(Err(_)) => {
                        sleep(Duration::from_millis(200)).await;
                        continue 'reconnect;
                    }
                    Ok(Ok(n)) => {
                        tail.push_str(&String::from_utf8_lossy(&buf[..n]));
                        if BOOT_MARKERS.iter().any(|marker| tail.contains(marker)) {
                            info!("{} {} reported ready", platform, version);
                            return Ok(());
                        }
                        // Keep only enough to match a marker split across
                        // reads.
                        if tail.len() > 8192 {
                            let mut split = tail.len() - 256;
                            while !tail.is_char_boundary(split) {
                                split += 1;
                            }
                            tail.drain(..split);
                        }
                    }
                }
            }
        }
    }
}

fn record_is_live(record: &InstanceRecord) -> bool {
    [&record.qemu, &record.runtime, &record.relay]
        .into_iter()
        .flatten()
        .any(supervisor::is_alive)
}

/// Which other instance, if any, currently owns the singleton display.
/// The emulator's VNC channel stays bound as long as the emulator lives,
/// so a live emulator with the display flag counts even if its relay died.
fn display_owner(
    state: &EmulatorState,
    requesting_platform: Platform,
    requesting_version: &str,
) -> Option<(Platform, String)> {
    state
        .iter()
        .filter(|(p, v, _)| !(*p == requesting_platform && *v == requesting_version))
        .find(|(_, _, record)| {
            record.display
                && [&record.qemu, &record.relay]
                    .into_iter()
                    .flatten()
                    .any(supervisor::is_alive)
        })
        .map(|(p, v, _)| (p, v.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    /// A binary that accepts any arguments and stays alive.
    fn fake_daemon(dir: &Path) -> PathBuf {
        let path = dir.join("fake-daemon.sh");
        std::fs::write(&path, "#!/bin/sh\nexec sleep 60\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// A "device emulator" that records its argv and stays alive, so a
    /// test can discover which console port it was given.
    fn fake_qemu(dir: &Path) -> PathBuf {
        let path = dir.join("fake-qemu.sh");
        let script = format!(
            "#!/bin/sh\necho \"$@\" > \"{}\"\nexec sleep 60\n",
            dir.join("qemu-args").display()
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Waits for the fake emulator to record its argv, then plays the
    /// firmware's side of the serial console: accept one connection and
    /// emit a boot marker, split across two writes.
    async fn serve_console(args_file: PathBuf) {
        use tokio::io::AsyncWriteExt;

        let args = loop {
            match std::fs::read_to_string(&args_file) {
                Ok(contents) if !contents.is_empty() => break contents,
                _ => sleep(Duration::from_millis(20)).await,
            }
        };
        // The console channel is the one serial arg without `nowait`.
        let port: u16 = args
            .split_whitespace()
            .find_map(|arg| arg.strip_prefix("tcp::")?.strip_suffix(",server"))
            .unwrap()
            .parse()
            .unwrap();

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .unwrap();
        let (mut console, _) = listener.accept().await.unwrap();
        console.write_all(b"boot: firmware 4.5\n<Laun").await.unwrap();
        console.flush().await.unwrap();
        sleep(Duration::from_millis(100)).await;
        console.write_all(b"cher>\n").await.unwrap();
        console.flush().await.unwrap();
        // Hold the socket open until the poller has seen the marker.
        sleep(Duration::from_secs(2)).await;
    }

    fn manager_at(home: &Path, config: ToolConfig) -> EmulatorManager {
        EmulatorManager::with_paths(config, ToolPaths::with_home(home))
    }

    fn install_fake_images(home: &Path, platform: Platform, version: &str) {
        let dir = home.join("sdks").join(version).join(platform.name()).join("qemu");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("qemu_micro_flash.bin"), b"flash").unwrap();
        std::fs::write(dir.join("qemu_spi_flash.bin"), b"flash").unwrap();
    }

    fn live_stamp(home: &Path) -> ProcessStamp {
        let daemon = fake_daemon(home);
        supervisor::spawn_detached(&daemon, &[], &[]).unwrap()
    }

    fn dead_stamp() -> ProcessStamp {
        ProcessStamp {
            pid: u32::MAX - 1,
            start_ticks: None,
        }
    }

    fn record_with(qemu: Option<ProcessStamp>, display: bool) -> InstanceRecord {
        InstanceRecord {
            qemu_port: 50100,
            console_port: 50101,
            gdb_port: 50102,
            runtime_port: 50103,
            display,
            qemu,
            runtime: None,
            relay: None,
        }
    }

    #[tokio::test]
    async fn spawn_failure_leaves_no_state() {
        let dir = tempfile::tempdir().unwrap();
        install_fake_images(dir.path(), Platform::Basalt, "4.5");

        let mut config = ToolConfig::default();
        config.qemu_binary = PathBuf::from("/nonexistent/wristkit-qemu");
        let manager = manager_at(dir.path(), config);

        let err = manager
            .ensure_running(Platform::Basalt, "4.5", false)
            .await
            .unwrap_err();
        assert!(matches!(err, EmulatorError::Spawn(_)));
        assert!(manager.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_image_fails_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_at(dir.path(), ToolConfig::default());

        let err = manager
            .ensure_running(Platform::Basalt, "4.5", false)
            .await
            .unwrap_err();
        assert!(matches!(err, EmulatorError::MissingImage(_, _)));
    }

    #[tokio::test]
    async fn boot_timeout_kills_process_and_records_nothing() {
        let dir = tempfile::tempdir().unwrap();
        install_fake_images(dir.path(), Platform::Basalt, "4.5");

        // A "qemu" that starts fine but never serves the console port.
        let mut config = ToolConfig::default();
        config.qemu_binary = fake_daemon(dir.path());
        config.boot_timeout_secs = 1;
        let manager = manager_at(dir.path(), config);

        let err = manager
            .ensure_running(Platform::Basalt, "4.5", false)
            .await
            .unwrap_err();
        assert!(matches!(err, EmulatorError::BootTimeout { .. }));
        assert!(manager.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_record_is_discarded_and_restarted() {
        let dir = tempfile::tempdir().unwrap();
        install_fake_images(dir.path(), Platform::Basalt, "4.5");

        let mut config = ToolConfig::default();
        config.qemu_binary = PathBuf::from("/nonexistent/wristkit-qemu");
        let manager = manager_at(dir.path(), config);

        let store = StateStore::new(ToolPaths::with_home(dir.path()).state_file());
        let mut state = EmulatorState::default();
        state.insert(Platform::Basalt, "4.5", record_with(Some(dead_stamp()), false));
        store.save(&state).unwrap();

        // The dead record is pruned, then the fresh start fails on the
        // missing binary; the stale pid is never reused.
        let err = manager
            .ensure_running(Platform::Basalt, "4.5", false)
            .await
            .unwrap_err();
        assert!(matches!(err, EmulatorError::Spawn(_)));
    }

    #[tokio::test]
    async fn display_conflict_refused_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        install_fake_images(dir.path(), Platform::Chalk, "4.5");

        let manager = manager_at(dir.path(), ToolConfig::default());

        let relay = live_stamp(dir.path());
        let store = StateStore::new(ToolPaths::with_home(dir.path()).state_file());
        let mut state = EmulatorState::default();
        let mut owner = record_with(Some(live_stamp(dir.path())), true);
        owner.relay = Some(relay);
        state.insert(Platform::Basalt, "4.5", owner.clone());
        store.save(&state).unwrap();

        let err = manager
            .ensure_running(Platform::Chalk, "4.5", true)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EmulatorError::DisplayConflict {
                platform: Platform::Basalt,
                ..
            }
        ));
        // Nothing was spawned or recorded for chalk.
        assert!(store.load().unwrap().get(Platform::Chalk, "4.5").is_none());

        supervisor::terminate(&owner.qemu.unwrap(), true);
        supervisor::terminate(&owner.relay.unwrap(), true);
    }

    #[tokio::test]
    async fn runtime_respawn_reuses_live_emulator() {
        let dir = tempfile::tempdir().unwrap();

        let mut config = ToolConfig::default();
        config.runtime_binary = fake_daemon(dir.path());
        let manager = manager_at(dir.path(), config);

        let qemu = live_stamp(dir.path());
        let store = StateStore::new(ToolPaths::with_home(dir.path()).state_file());
        let mut state = EmulatorState::default();
        state.insert(Platform::Basalt, "4.5", record_with(Some(qemu), false));
        store.save(&state).unwrap();

        let endpoint = manager
            .ensure_running(Platform::Basalt, "4.5", false)
            .await
            .unwrap();
        // The emulator was reused, a fresh runtime port was allocated.
        assert_eq!(endpoint.qemu_port, 50100);
        assert_ne!(endpoint.runtime_port, 50103);

        let record = store.load().unwrap().get(Platform::Basalt, "4.5").cloned().unwrap();
        assert_eq!(record.qemu, Some(qemu));
        let first_runtime = record.runtime.unwrap();
        assert!(supervisor::is_alive(&first_runtime));

        // Second identical request reuses everything: same endpoint, no
        // new processes.
        let again = manager
            .ensure_running(Platform::Basalt, "4.5", false)
            .await
            .unwrap();
        assert_eq!(again, endpoint);
        let record = store.load().unwrap().get(Platform::Basalt, "4.5").cloned().unwrap();
        assert_eq!(record.runtime, Some(first_runtime));

        manager.stop(Platform::Basalt, "4.5", true).await.unwrap();
    }

    #[tokio::test]
    async fn stop_removes_instance_and_kills_processes() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_at(dir.path(), ToolConfig::default());

        let qemu = live_stamp(dir.path());
        let runtime = live_stamp(dir.path());
        let store = StateStore::new(ToolPaths::with_home(dir.path()).state_file());
        let mut state = EmulatorState::default();
        let mut record = record_with(Some(qemu), false);
        record.runtime = Some(runtime);
        state.insert(Platform::Basalt, "4.5", record);
        store.save(&state).unwrap();

        manager.stop(Platform::Basalt, "4.5", false).await.unwrap();

        assert!(manager.list_running().unwrap().is_empty());
        assert!(store.load().unwrap().get(Platform::Basalt, "4.5").is_none());
        assert!(!supervisor::is_alive(&qemu));
        assert!(!supervisor::is_alive(&runtime));
    }

    #[tokio::test]
    async fn stop_unknown_instance_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_at(dir.path(), ToolConfig::default());
        manager.stop(Platform::Emery, "4.4", false).await.unwrap();
    }

    #[tokio::test]
    async fn wipe_refuses_while_running_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ToolPaths::with_home(dir.path());
        let manager = manager_at(dir.path(), ToolConfig::default());

        let persist = paths.persist_dir(Platform::Basalt, "4.5");
        std::fs::create_dir_all(&persist).unwrap();

        let qemu = live_stamp(dir.path());
        let store = StateStore::new(paths.state_file());
        let mut state = EmulatorState::default();
        state.insert(Platform::Basalt, "4.5", record_with(Some(qemu), false));
        store.save(&state).unwrap();

        let err = manager.wipe(Platform::Basalt, "4.5").unwrap_err();
        assert!(matches!(err, EmulatorError::WipeWhileRunning { .. }));
        assert!(persist.exists());

        manager.stop(Platform::Basalt, "4.5", true).await.unwrap();
        manager.wipe(Platform::Basalt, "4.5").unwrap();
        assert!(!persist.exists());
    }

    #[tokio::test]
    async fn boot_marker_starts_runtime_and_persists_record() {
        let dir = tempfile::tempdir().unwrap();
        install_fake_images(dir.path(), Platform::Basalt, "4.5");

        let mut config = ToolConfig::default();
        config.qemu_binary = fake_qemu(dir.path());
        config.runtime_binary = fake_daemon(dir.path());
        config.boot_timeout_secs = 10;
        let manager = manager_at(dir.path(), config);

        let console = tokio::spawn(serve_console(dir.path().join("qemu-args")));

        let endpoint = manager
            .ensure_running(Platform::Basalt, "4.5", false)
            .await
            .unwrap();

        // The marker was seen, the runtime came up and the record was
        // persisted with live stamps for both processes.
        let store = StateStore::new(ToolPaths::with_home(dir.path()).state_file());
        let record = store
            .load()
            .unwrap()
            .get(Platform::Basalt, "4.5")
            .cloned()
            .unwrap();
        assert_eq!(record.runtime_port, endpoint.runtime_port);
        assert!(!record.display);
        assert!(record.relay.is_none());
        assert!(supervisor::is_alive(record.qemu.as_ref().unwrap()));
        assert!(supervisor::is_alive(record.runtime.as_ref().unwrap()));

        console.abort();
        manager.stop(Platform::Basalt, "4.5", true).await.unwrap();
    }

    #[tokio::test]
    async fn kill_all_stops_everything_and_persists_removals() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_at(dir.path(), ToolConfig::default());

        let qemu_a = live_stamp(dir.path());
        let qemu_b = live_stamp(dir.path());
        let store = StateStore::new(ToolPaths::with_home(dir.path()).state_file());
        let mut state = EmulatorState::default();
        state.insert(Platform::Basalt, "4.5", record_with(Some(qemu_a), false));
        state.insert(Platform::Emery, "4.4", record_with(Some(qemu_b), false));
        store.save(&state).unwrap();

        manager.kill_all(false).await.unwrap();

        assert!(!supervisor::is_alive(&qemu_a));
        assert!(!supervisor::is_alive(&qemu_b));
        assert!(store.load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn display_mismatch_restarts_instance() {
        let dir = tempfile::tempdir().unwrap();
        install_fake_images(dir.path(), Platform::Basalt, "4.5");

        // Fresh start after the teardown will fail on the missing qemu
        // binary, which proves the old instance was not reused.
        let mut config = ToolConfig::default();
        config.qemu_binary = PathBuf::from("/nonexistent/wristkit-qemu");
        let manager = manager_at(dir.path(), config);

        let qemu = live_stamp(dir.path());
        let store = StateStore::new(ToolPaths::with_home(dir.path()).state_file());
        let mut state = EmulatorState::default();
        state.insert(Platform::Basalt, "4.5", record_with(Some(qemu), false));
        store.save(&state).unwrap();

        let err = manager
            .ensure_running(Platform::Basalt, "4.5", true)
            .await
            .unwrap_err();
        assert!(matches!(err, EmulatorError::Spawn(_)));
        assert!(!supervisor::is_alive(&qemu));
    }
}
