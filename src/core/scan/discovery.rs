//! Per-adapter discovery loop
//!
//! Discovery runs continuously (no start/stop cycling, which would trip
//! `org.bluez.Error.InProgress` on busy systems). Every tick snapshots the
//! stack's device tree, throttles persistence per MAC, and schedules GATT
//! connect jobs. Scales to many devices: database writes are throttled per
//! MAC and connection attempts are rate-limited.

use super::blacklist::ConnectBlacklist;
use super::connect;
use super::markers::{self, DeviceTypePatterns};
use super::observation::{self, DeviceFamily, Observation};
use super::tracker::MacTracker;
use super::ScanError;
use crate::config::ScanSettings;
use crate::core::catalog::Catalog;
use crate::core::gps::GpsState;
use crate::core::mac;
use crate::core::store::{
    AdvertisementParams, ClassicDiscoveryParams, ClassicInfoParams, SaveParams, Store, StoreResult,
};
use crate::linef;
use crate::utils::console::Color;
use crate::utils::{now_timestamp, safe_name};
use bluer::{Adapter, DiscoveryFilter, DiscoveryTransport};
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// How often the per-MAC bookkeeping is checked for stale entries.
const EVICT_CHECK_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Everything a discovery loop and its connect workers share.
pub struct AdapterRuntime {
    pub adapter_id: String,
    pub adapter: Adapter,
    pub store: Arc<Store>,
    pub gps: Arc<GpsState>,
    pub catalog: Arc<Catalog>,
    pub patterns: Arc<DeviceTypePatterns>,
    pub blacklist: Option<Arc<ConnectBlacklist>>,
    pub session_id: i64,
    pub tag: Option<String>,
    pub max_connect: usize,
    pub settings: ScanSettings,
}

/// Run the discovery loop until the token is cancelled.
pub async fn run_discovery_loop(
    ctx: Arc<AdapterRuntime>,
    token: CancellationToken,
) -> Result<(), ScanError> {
    let cfg = &ctx.settings;
    let adapter = &ctx.adapter;
    let adapter_id = ctx.adapter_id.clone();

    // Best-effort: another process controlling discovery may reject the
    // filter; scanning still works with its settings.
    let filter = DiscoveryFilter {
        transport: DiscoveryTransport::Auto,
        rssi: Some(cfg.discover_filter_rssi),
        duplicate_data: cfg.duplicate_data,
        ..Default::default()
    };
    let _ = adapter.set_discovery_filter(filter).await;

    // Start discovery once. Dropping the event stream stops the session, so
    // it is held (and drained) for the lifetime of this loop. When discovery
    // is already in progress we reuse the existing session and hold nothing,
    // leaving it running on teardown.
    let mut discovery_events = match adapter.discover_devices().await {
        Ok(events) => {
            linef!("[SCAN]", Color::Gray, "adapter={adapter_id} discovery started");
            Some(Box::pin(events))
        }
        Err(e) if e.kind == bluer::ErrorKind::InProgress => {
            linef!(
                "[SCAN]",
                Color::Gray,
                "adapter={adapter_id} discovery already in progress (reusing)"
            );
            None
        }
        Err(e) => {
            tracing::warn!("bluez StartDiscovery {adapter_id} error: {e}");
            None
        }
    };

    // Connect worker pool over a bounded shared queue.
    let (queue_tx, queue_rx) = mpsc::channel::<String>(cfg.connect_queue_size);
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<String>();
    let queue_rx = Arc::new(Mutex::new(queue_rx));
    for _ in 0..ctx.max_connect.max(1) {
        tokio::spawn(connect::run_connect_worker(
            ctx.clone(),
            token.clone(),
            queue_rx.clone(),
            done_tx.clone(),
        ));
    }

    let mut tracker = MacTracker::new();
    let mut ticker = tokio::time::interval(cfg.snapshot_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_evict = Instant::now();

    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
            // Device events only drain the stream that keeps the discovery
            // session alive; state changes are picked up by snapshots.
            ev = async {
                match discovery_events.as_mut() {
                    Some(events) => events.next().await,
                    None => std::future::pending().await,
                }
            } => {
                if ev.is_none() {
                    discovery_events = None;
                }
                continue;
            }
        }

        // Drain completed connect jobs.
        while let Ok(mac) = done_rx.try_recv() {
            tracker.clear_in_flight(&mac);
        }

        let snapshot = match observation::snapshot_adapter(adapter).await {
            Ok(s) => s,
            Err(e) => {
                linef!("[ERROR]", Color::Yellow, "scan failed on {adapter_id}: {e}");
                continue;
            }
        };
        if snapshot.is_empty() {
            continue;
        }

        let now = Instant::now();
        for (mac, obs) in snapshot {
            if token.is_cancelled() {
                break;
            }
            let mac = mac::normalize_mac(&mac);
            if mac.is_empty() {
                continue;
            }
            process_observation(&ctx, &mut tracker, &queue_tx, &mac, &obs, now);
        }
        if token.is_cancelled() {
            return Ok(());
        }

        if last_evict.elapsed() >= EVICT_CHECK_INTERVAL {
            last_evict = Instant::now();
            let evicted = tracker.evict_stale();
            if evicted > 0 {
                tracing::debug!("adapter {adapter_id}: evicted {evicted} stale device entries");
            }
        }
    }
}

fn rssi_str(rssi: Option<i16>) -> String {
    match rssi {
        Some(v) => v.to_string(),
        None => "n/a".to_string(),
    }
}

fn swallow<T>(what: &str, res: StoreResult<T>) {
    if let Err(e) = res {
        tracing::warn!("store {what} failed: {e}");
    }
}

/// Process one device from a snapshot: console lines, throttled persistence
/// and connect scheduling. The store swallows hot-path errors.
fn process_observation(
    ctx: &AdapterRuntime,
    tracker: &mut MacTracker,
    queue_tx: &mpsc::Sender<String>,
    mac: &str,
    obs: &Observation,
    now: Instant,
) {
    let cfg = &ctx.settings;
    let adapter_id = &ctx.adapter_id;
    let state = tracker.observe(mac);

    let name = safe_name(&obs.name);
    if !state.known {
        state.known = true;
        linef!(
            "[NEW]",
            Color::Green,
            "{name} (Interface: {adapter_id}) RSSI: {}",
            rssi_str(obs.rssi)
        );
    }

    let ts = now_timestamp();
    let gps_text = ctx.gps.string_for_record();
    let (lat, lon, gps_ok, gps_cached) = ctx.gps.fix_snapshot();
    let (lat, lon) = if gps_ok { (Some(lat), Some(lon)) } else { (None, None) };
    let gps_source = match ctx.gps.source() {
        "" => None,
        s => Some(s),
    };

    let family = obs.family();
    let (mac_type, mac_subtype) = mac::classify_address(mac, obs.address_random);
    let vendor = ctx.catalog.vendor_for_mac(mac).map(str::to_string);

    let annotated_uuids = observation::annotate_uuids(&ctx.catalog, &obs.uuids);
    let mfg_json = serde_json::to_string(&obs.manufacturer).unwrap_or_else(|_| "[]".into());
    let svc_uuid_json = serde_json::to_string(&annotated_uuids).unwrap_or_else(|_| "[]".into());
    let svc_data_json = serde_json::to_string(&obs.service_data).unwrap_or_else(|_| "[]".into());
    let adv_json = observation::build_advertisement_json(adapter_id, obs, &name, &annotated_uuids);

    let marked_type =
        markers::detect_typed_device(&ctx.patterns, &obs.uuids, &obs.manufacturer, &obs.name);

    let within_device_window = matches!(
        state.last_device_write,
        Some(last) if now.duration_since(last) < cfg.device_update_min_period
    );

    if within_device_window {
        // Throttled: only cheap updates. GPS refreshes when the text
        // changed or the last quick update is old enough.
        if let Some(gps_text) = gps_text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let changed = state.last_gps_val.as_deref() != Some(gps_text);
            let stale = !matches!(
                state.last_gps_write,
                Some(last) if now.duration_since(last) < cfg.gps_quick_update_min_period
            );
            if changed || stale {
                swallow("gps update", ctx.store.update_device_gps(mac, gps_text));
                swallow(
                    "gps history",
                    ctx.store.record_device_gps_history_if_changed(
                        Some(ctx.session_id),
                        mac,
                        &ts,
                        lat,
                        lon,
                        gps_text,
                        gps_cached,
                        gps_source,
                    ),
                );
                state.last_gps_val = Some(gps_text.to_string());
                state.last_gps_write = Some(now);
            }
        }
        if let Some(marked) = marked_type.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
            if state.last_marked.as_deref() != Some(marked) {
                state.last_marked = Some(marked.to_string());
                linef!("[MARK]", Color::Cyan, "{name} ({mac}) type={marked}");
            }
            swallow("marker update", ctx.store.update_device_marked_type(mac, marked));
        }
    } else {
        // Full device write.
        state.last_device_write = Some(now);
        if state.seen_count > 1 {
            linef!(
                "[UPDATE]",
                Color::Green,
                "{name} (Interface: {adapter_id}) RSSI: {}",
                rssi_str(obs.rssi)
            );
        }

        if let Some(gps_text) = gps_text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            swallow("gps update", ctx.store.update_device_gps(mac, gps_text));
            swallow(
                "gps history",
                ctx.store.record_device_gps_history_if_changed(
                    Some(ctx.session_id),
                    mac,
                    &ts,
                    lat,
                    lon,
                    gps_text,
                    gps_cached,
                    gps_source,
                ),
            );
            state.last_gps_val = Some(gps_text.to_string());
            state.last_gps_write = Some(now);
        }

        swallow(
            "device upsert",
            ctx.store.save_device(SaveParams {
                session_id: Some(ctx.session_id),
                device_family: Some(family.as_str().to_string()),
                name: Some(name.clone()),
                mac: mac.to_string(),
                mac_type: Some(mac_type.to_string()),
                mac_subtype: Some(mac_subtype.to_string()),
                rssi: obs.rssi.map(i64::from),
                timestamp: Some(ts.clone()),
                adapter: Some(adapter_id.clone()),
                manufacturer_data: Some(mfg_json),
                manufacturer_name: vendor,
                service_uuids: Some(svc_uuid_json),
                service_data: Some(svc_data_json),
                tx_power: obs.tx_power_string(),
                platform_data: obs.props_json.clone(),
                advertisement_json: adv_json.clone(),
                gps: gps_text.clone(),
                update_existing: true,
                tag: ctx.tag.clone(),
                ..Default::default()
            }),
        );

        if let Some(marked) = marked_type.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
            if state.last_marked.as_deref() != Some(marked) {
                state.last_marked = Some(marked.to_string());
                linef!("[MARK]", Color::Cyan, "{name} ({mac}) type={marked}");
            }
            swallow("marker update", ctx.store.update_device_marked_type(mac, marked));
        }
    }

    // Advertisement history, throttled per MAC.
    let adv_due = !matches!(
        state.last_adv_write,
        Some(last) if now.duration_since(last) < cfg.adv_insert_min_period
    );
    if adv_due {
        state.last_adv_write = Some(now);
        match ctx.store.insert_advertisement(AdvertisementParams {
            session_id: Some(ctx.session_id),
            mac: mac.to_string(),
            timestamp: ts.clone(),
            rssi: Some(i64::from(obs.rssi.unwrap_or(0))),
            raw: None,
            json: adv_json.clone(),
        }) {
            Ok(id) if id > 0 => {
                swallow("adv backlink", ctx.store.update_device_last_adv_id(mac, id));
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("store advertisement insert failed: {e}"),
        }
    }

    // Classic supplemental tables for likely BR/EDR devices.
    if obs.is_classic_likely() {
        let classic_due = !matches!(
            state.last_classic_hist,
            Some(last) if now.duration_since(last) < cfg.classic_hist_min_period
        );
        if classic_due {
            state.last_classic_hist = Some(now);
            swallow(
                "classic discovery",
                ctx.store
                    .insert_classic_discovery(ClassicDiscoveryParams {
                        session_id: Some(ctx.session_id),
                        mac: mac.to_string(),
                        timestamp: ts.clone(),
                        rssi: Some(i64::from(obs.rssi.unwrap_or(0))),
                        class: obs.class,
                        props_json: obs.props_json.clone(),
                    })
                    .map(|_| ()),
            );
        }

        swallow(
            "classic info",
            ctx.store.upsert_classic_info(ClassicInfoParams {
                mac: mac.to_string(),
                class: obs.class,
                icon: obs.icon.clone(),
                paired: obs.paired,
                trusted: obs.trusted,
                connected: obs.connected,
                blocked: obs.blocked,
                legacy_pairing: obs.legacy_pairing,
                modalias: obs.modalias.clone(),
                uuids_json: obs.uuids_json.clone(),
                last_seen: Some(ts.clone()),
                props_json: obs.props_json.clone(),
            }),
        );
    }

    // Connect scheduling (BLE / dual only).
    if family == DeviceFamily::Classic {
        return;
    }
    let has_gatt = ctx.store.has_gatt_services(mac).unwrap_or(false);
    if !super::tracker::should_schedule_connect(
        state,
        obs.rssi,
        cfg.connect_rssi_min,
        has_gatt,
        cfg.connect_cooldown,
    ) {
        return;
    }
    if let Some(blacklist) = &ctx.blacklist {
        if blacklist.matches(&name) {
            tracing::debug!("skipping blacklisted device {name} ({mac})");
            return;
        }
    }

    state.last_conn_attempt = Some(now);
    state.in_flight = true;
    if queue_tx.try_send(mac.to_string()).is_err() {
        // Queue full; try again on a later tick.
        state.in_flight = false;
    }
}
