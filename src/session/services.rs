//! Live service update controller
//!
//! Loads the viewer's appointments once, then keeps them current by
//! merging partial updates from the event stream.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;

use crate::api::ServiceApi;
use crate::models::{GeoLocation, ServiceCenter, ServiceRecord, ServiceUpdate};
use crate::realtime::{ConnectionState, UpdateFeed, UpdateListener};

/// Service centre locations keyed by normalised name.
#[derive(Debug, Clone, Default)]
pub struct CenterDirectory {
    by_name: HashMap<String, GeoLocation>,
}

fn center_key(name: &str) -> String {
    name.trim().to_lowercase()
}

impl CenterDirectory {
    pub fn new(centers: &[ServiceCenter]) -> Self {
        let by_name = centers
            .iter()
            .filter_map(|c| Some((center_key(&c.name), c.location()?)))
            .collect();
        Self { by_name }
    }

    pub fn locate(&self, name: &str) -> Option<GeoLocation> {
        self.by_name.get(&center_key(name)).copied()
    }

    /// Re-derive the location from the record's centre name.
    pub fn enrich(&self, mut record: ServiceRecord) -> ServiceRecord {
        record.location = self.locate(&record.service_center);
        record
    }
}

/// Render snapshot of the service list.
#[derive(Debug, Clone, Default)]
pub struct ServicesView {
    pub records: Vec<ServiceRecord>,
    pub error: Option<String>,
    pub connection: ConnectionState,
    /// Record touched by the latest update.
    pub last_changed: Option<String>,
}

pub struct LiveServices {
    api: Arc<dyn ServiceApi>,
    feed: Arc<dyn UpdateFeed>,
    user_id: String,
    records: Vec<ServiceRecord>,
    directory: CenterDirectory,
    error: Option<String>,
    listener: Option<UpdateListener>,
    last_changed: Option<String>,
}

impl LiveServices {
    pub fn new(api: Arc<dyn ServiceApi>, feed: Arc<dyn UpdateFeed>, user_id: &str) -> Self {
        Self {
            api,
            feed,
            user_id: user_id.to_string(),
            records: Vec::new(),
            directory: CenterDirectory::default(),
            error: None,
            listener: None,
            last_changed: None,
        }
    }

    pub fn records(&self) -> &[ServiceRecord] {
        &self.records
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Initial fetch, then open the feed. Never fails: a failed fetch
    /// leaves an empty list and an error string.
    pub async fn mount(&mut self) {
        if self.listener.is_some() {
            tracing::debug!("Service list already mounted");
            return;
        }

        let (appointments, centers) = tokio::join!(
            self.api.appointments(&self.user_id),
            self.api.service_centers(),
        );

        self.directory = match centers {
            Ok(centers) => CenterDirectory::new(&centers),
            Err(e) => {
                tracing::debug!("Service centre lookup unavailable: {}", e);
                CenterDirectory::default()
            }
        };

        match appointments {
            Ok(summaries) => {
                self.records = summaries
                    .iter()
                    .map(|s| self.directory.enrich(ServiceRecord::from_summary(s)))
                    .collect();
                self.error = None;
                tracing::info!("Loaded {} service record(s)", self.records.len());
            }
            Err(e) => {
                tracing::error!("Failed to load services: {}", e);
                self.records.clear();
                self.error = Some(format!("Failed to load services: {}", e));
            }
        }

        self.listener = Some(self.feed.on_update());
        self.feed.connect(&self.user_id);
    }

    /// Merge a patch into its record. Unknown ids are ignored.
    pub fn apply_update(&mut self, update: &ServiceUpdate) -> Option<&ServiceRecord> {
        let Some(pos) = self.records.iter().position(|r| r.id == update.id) else {
            tracing::debug!("Update for unknown service {} ignored", update.id);
            return None;
        };
        let merged = self.directory.enrich(self.records[pos].merged(update));
        self.records[pos] = merged;
        self.last_changed = Some(update.id.clone());
        Some(&self.records[pos])
    }

    /// Wait for the next update that changes a known record.
    pub async fn next_change(&mut self) -> Option<ServiceRecord> {
        loop {
            let update = self.listener.as_mut()?.recv().await?;
            if let Some(record) = self.apply_update(&update) {
                return Some(record.clone());
            }
        }
    }

    pub fn view(&self) -> ServicesView {
        ServicesView {
            records: self.records.clone(),
            error: self.error.clone(),
            connection: self.feed.state(),
            last_changed: self.last_changed.clone(),
        }
    }

    /// Publish a snapshot after every merged update until the view is
    /// dropped or the feed ends, then tear down.
    pub async fn run(&mut self, view: watch::Sender<ServicesView>) {
        view.send_replace(self.view());
        loop {
            tokio::select! {
                change = self.next_change() => match change {
                    Some(record) => {
                        tracing::debug!("Service {} now {}", record.id, record.status.as_str());
                        view.send_replace(self.view());
                    }
                    None => {
                        tracing::warn!("Service update stream ended");
                        break;
                    }
                },
                _ = view.closed() => break,
            }
        }
        self.unmount();
    }

    pub fn unmount(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.unsubscribe();
        }
        self.feed.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::models::{AppointmentSummary, ServiceStatus, NOT_ASSIGNED};
    use crate::realtime::sse::ListenerSet;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeApi {
        appointments: Option<Vec<AppointmentSummary>>,
        centers: Option<Vec<ServiceCenter>>,
    }

    #[async_trait]
    impl ServiceApi for FakeApi {
        async fn appointments(&self, user_id: &str) -> Result<Vec<AppointmentSummary>, ApiError> {
            assert_eq!(user_id, "u1");
            self.appointments.clone().ok_or(ApiError::Status {
                status: 503,
                url: "/slot-appointments".into(),
                body: String::new(),
            })
        }

        async fn service_centers(&self) -> Result<Vec<ServiceCenter>, ApiError> {
            self.centers
                .clone()
                .ok_or_else(|| ApiError::NotFound("/service-centers".into()))
        }
    }

    #[derive(Default)]
    struct FakeFeed {
        listeners: ListenerSet,
        connected_to: Mutex<Option<String>>,
        disconnects: AtomicUsize,
    }

    impl UpdateFeed for FakeFeed {
        fn connect(&self, subject_id: &str) {
            *self.connected_to.lock().unwrap() = Some(subject_id.to_string());
        }

        fn on_update(&self) -> UpdateListener {
            self.listeners.register()
        }

        fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            *self.connected_to.lock().unwrap() = None;
        }

        fn state(&self) -> ConnectionState {
            match *self.connected_to.lock().unwrap() {
                Some(_) => ConnectionState::Connected,
                None => ConnectionState::Disconnected,
            }
        }
    }

    fn summaries() -> Vec<AppointmentSummary> {
        serde_json::from_value(serde_json::json!([
            {
                "id": "A1",
                "vehicleName": "Civic",
                "vehicleNumber": "KA-01-1234",
                "serviceName": "Oil change",
                "status": "PENDING",
                "serviceCenterName": "Downtown Auto",
                "employeeName": null
            },
            {
                "id": 2,
                "vehicleMake": "Toyota",
                "vehicleModel": "Corolla",
                "status": "confirmed",
                "centerName": "Airport Road"
            }
        ]))
        .unwrap()
    }

    fn centers() -> Vec<ServiceCenter> {
        serde_json::from_value(serde_json::json!([
            {"id": 1, "name": "  downtown auto ", "latitude": 12.97, "longitude": 77.59},
            {"id": 2, "name": "Airport Road"}
        ]))
        .unwrap()
    }

    fn controller(api: FakeApi) -> (LiveServices, Arc<FakeFeed>) {
        let feed = Arc::new(FakeFeed::default());
        (LiveServices::new(Arc::new(api), feed.clone(), "u1"), feed)
    }

    #[test]
    fn test_directory_matches_trimmed_case_insensitive() {
        let directory = CenterDirectory::new(&centers());
        assert!(directory.locate("DOWNTOWN AUTO").is_some());
        // Centres without coordinates are skipped.
        assert!(directory.locate("Airport Road").is_none());
    }

    #[tokio::test]
    async fn test_mount_maps_and_enriches() {
        let (mut services, feed) = controller(FakeApi {
            appointments: Some(summaries()),
            centers: Some(centers()),
        });
        services.mount().await;

        let records = services.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].license_plate, "KA-01-1234");
        assert_eq!(records[0].assigned_employee, NOT_ASSIGNED);
        assert_eq!(records[0].location.unwrap().latitude, 12.97);
        assert_eq!(records[1].id, "2");
        assert_eq!(records[1].vehicle_name, "Toyota Corolla");
        assert_eq!(records[1].location, None);
        assert_eq!(feed.connected_to.lock().unwrap().as_deref(), Some("u1"));
        assert_eq!(feed.listeners.broadcast(&ServiceUpdate::default()), 1);
    }

    #[tokio::test]
    async fn test_centre_lookup_failure_never_blocks_list() {
        let (mut services, _) = controller(FakeApi {
            appointments: Some(summaries()),
            centers: None,
        });
        services.mount().await;
        assert_eq!(services.records().len(), 2);
        assert!(services.records().iter().all(|r| r.location.is_none()));
        assert_eq!(services.error(), None);
    }

    #[tokio::test]
    async fn test_failed_fetch_shows_empty_list() {
        let (mut services, feed) = controller(FakeApi {
            appointments: None,
            centers: Some(centers()),
        });
        services.mount().await;
        assert!(services.records().is_empty());
        assert!(services.error().unwrap().contains("503"));
        // The feed still opens.
        assert!(feed.connected_to.lock().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_update_merges_and_reenriches() {
        let (mut services, _) = controller(FakeApi {
            appointments: Some(summaries()),
            centers: Some(centers()),
        });
        services.mount().await;
        let before = services.records()[0].clone();

        let merged = services
            .apply_update(&ServiceUpdate {
                id: "A1".into(),
                status: Some(ServiceStatus::Completed),
                assigned_employee: Some("Jane".into()),
                ..Default::default()
            })
            .unwrap()
            .clone();
        assert_eq!(merged.status, ServiceStatus::Completed);
        assert_eq!(merged.assigned_employee, "Jane");
        assert_eq!(merged.vehicle_name, before.vehicle_name);
        assert_eq!(merged.location, before.location);

        // Moving to an unknown centre drops the stale location.
        let moved = services
            .apply_update(&ServiceUpdate {
                id: "A1".into(),
                service_center: Some("Elsewhere".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(moved.location, None);
        assert_eq!(moved.status, ServiceStatus::Completed);

        assert!(services
            .apply_update(&ServiceUpdate {
                id: "nope".into(),
                ..Default::default()
            })
            .is_none());
    }

    #[tokio::test]
    async fn test_run_publishes_merged_updates() {
        let (mut services, feed) = controller(FakeApi {
            appointments: Some(summaries()),
            centers: Some(centers()),
        });
        services.mount().await;

        let (view_tx, mut view_rx) = watch::channel(ServicesView::default());
        let updates = feed.listeners.clone();
        let driver = tokio::spawn(async move {
            services.run(view_tx).await;
        });

        view_rx.wait_for(|v| v.records.len() == 2).await.unwrap();
        updates.broadcast(&ServiceUpdate {
            id: "unknown".into(),
            ..Default::default()
        });
        updates.broadcast(&ServiceUpdate {
            id: "2".into(),
            status: Some(ServiceStatus::InProgress),
            ..Default::default()
        });
        let view = view_rx
            .wait_for(|v| v.last_changed.as_deref() == Some("2"))
            .await
            .unwrap()
            .clone();
        assert_eq!(view.records[1].status, ServiceStatus::InProgress);
        assert_eq!(view.records[0].status, ServiceStatus::Pending);
        assert_eq!(view.connection, ConnectionState::Connected);

        // Dropping the view ends the run and releases the feed.
        drop(view_rx);
        driver.await.unwrap();
        assert_eq!(feed.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(updates.broadcast(&ServiceUpdate::default()), 0);
    }

    #[tokio::test]
    async fn test_unmount_releases_listener_and_feed() {
        let (mut services, feed) = controller(FakeApi {
            appointments: Some(Vec::new()),
            centers: Some(Vec::new()),
        });
        services.mount().await;
        services.unmount();

        assert_eq!(feed.listeners.broadcast(&ServiceUpdate::default()), 0);
        assert_eq!(feed.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(feed.state(), ConnectionState::Disconnected);
    }
}
