use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use super::background::lock;
use super::{
    AckRequest, BridgeMessage, BridgeRequest, HostAction, MaterialCheckResponse,
    SharedBackground,
};
use crate::error::{PresetError, Result};
use crate::logging::log_runtime_error;

/// Where the page script gets its messages from.
pub trait MessageSource {
    fn material_check(&mut self) -> Result<MaterialCheckResponse>;
    fn force_refresh(&mut self) -> Result<()>;
    fn ack(&mut self, seqs: &[u64]) -> Result<()>;
}

/// The host application's store.
pub trait HostDispatcher {
    fn dispatch(&mut self, action: HostAction) -> Result<()>;
}

/// Talks to a `Background` in the same process.
pub struct LocalSource {
    background: SharedBackground,
}

impl LocalSource {
    pub fn new(background: SharedBackground) -> Self {
        LocalSource { background }
    }
}

impl MessageSource for LocalSource {
    fn material_check(&mut self) -> Result<MaterialCheckResponse> {
        lock(&self.background)?.material_check()
    }

    fn force_refresh(&mut self) -> Result<()> {
        lock(&self.background)?.force_refresh()
    }

    fn ack(&mut self, seqs: &[u64]) -> Result<()> {
        lock(&self.background)?.ack(seqs);
        Ok(())
    }
}

/// Talks to the daemon over HTTP.
pub struct HttpSource {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpSource {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(HttpSource {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn post<B: serde::Serialize>(&self, path: &str, body: &B) -> Result<reqwest::blocking::Response> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self.client.post(&url).json(body).send()?;
        if !response.status().is_success() {
            return Err(PresetError::Protocol(format!(
                "{} returned status {}",
                url,
                response.status()
            )));
        }
        Ok(response)
    }
}

impl MessageSource for HttpSource {
    fn material_check(&mut self) -> Result<MaterialCheckResponse> {
        let response = self.post("material-check", &BridgeRequest::material_check())?;
        Ok(response.json()?)
    }

    fn force_refresh(&mut self) -> Result<()> {
        self.post("force-refresh", &BridgeRequest::force_refresh())?;
        Ok(())
    }

    fn ack(&mut self, seqs: &[u64]) -> Result<()> {
        self.post(
            "ack",
            &AckRequest {
                seqs: seqs.to_vec(),
            },
        )?;
        Ok(())
    }
}

/// Keeps every dispatched action.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    pub actions: Vec<HostAction>,
}

impl HostDispatcher for RecordingDispatcher {
    fn dispatch(&mut self, action: HostAction) -> Result<()> {
        self.actions.push(action);
        Ok(())
    }
}

/// Writes each action as one line of JSON.
pub struct JsonLinesDispatcher<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesDispatcher<W> {
    pub fn new(out: W) -> Self {
        JsonLinesDispatcher { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> HostDispatcher for JsonLinesDispatcher<W> {
    fn dispatch(&mut self, action: HostAction) -> Result<()> {
        serde_json::to_writer(&mut self.out, &action)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}

/// The page-side poller.
pub struct ContentBridge<S: MessageSource, D: HostDispatcher> {
    source: S,
    dispatcher: D,
    poll_interval: Duration,
    dev_mode: bool,
}

impl<S: MessageSource, D: HostDispatcher> ContentBridge<S, D> {
    pub fn new(source: S, dispatcher: D, poll_interval: Duration, dev_mode: bool) -> Self {
        ContentBridge {
            source,
            dispatcher,
            poll_interval,
            dev_mode,
        }
    }

    /// Apply a poll response in array order and return the sequence numbers
    /// that were handled.
    pub fn handle_material_check(&mut self, response: MaterialCheckResponse) -> Vec<u64> {
        let mut handled = Vec::with_capacity(response.messages.len());
        for envelope in response.messages {
            log::debug!("material check response");
            match &envelope.message {
                BridgeMessage::SetMaterials { .. } => log::debug!("updating materials"),
                BridgeMessage::SetMaterial { .. } => log::debug!("updating material"),
                BridgeMessage::Clone => log::debug!("cloning design"),
                BridgeMessage::ToggleUnits { .. } => log::debug!("toggle units"),
                BridgeMessage::SelectMaterial { .. } => log::debug!("select material"),
            }
            if let Some(action) = HostAction::from_message(envelope.message) {
                if let Err(e) = self.dispatcher.dispatch(action) {
                    log_runtime_error(self.dev_mode, "dispatch", &e);
                    continue;
                }
            }
            handled.push(envelope.seq);
        }
        handled
    }

    /// One poll. Returns how many messages were handled.
    pub fn poll_once(&mut self) -> usize {
        let response = match self.source.material_check() {
            Ok(r) => r,
            Err(e) => {
                log_runtime_error(self.dev_mode, "material check", &e);
                return 0;
            }
        };
        let handled = self.handle_material_check(response);
        if !handled.is_empty() {
            if let Err(e) = self.source.ack(&handled) {
                log_runtime_error(self.dev_mode, "ack", &e);
            }
        }
        handled.len()
    }

    pub fn force_refresh(&mut self) {
        match self.source.force_refresh() {
            Ok(()) => log::debug!("force refresh response"),
            Err(e) => log_runtime_error(self.dev_mode, "force refresh", &e),
        }
    }

    /// Refresh once right away, then poll until `running` is cleared.
    pub fn run(&mut self, running: &AtomicBool) {
        self.force_refresh();
        while running.load(Ordering::Relaxed) {
            thread::sleep(self.poll_interval);
            if !running.load(Ordering::Relaxed) {
                break;
            }
            self.poll_once();
        }
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    pub fn into_parts(self) -> (S, D) {
        (self.source, self.dispatcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{Background, Envelope, HostEvent, UnitType};
    use crate::material::{CutSetting, FormattedMaterial, MaterialId, RawMaterial};
    use crate::store::LocalStore;

    struct FailingSource;

    impl MessageSource for FailingSource {
        fn material_check(&mut self) -> Result<MaterialCheckResponse> {
            Err(PresetError::Protocol("extension unavailable".to_string()))
        }
        fn force_refresh(&mut self) -> Result<()> {
            Err(PresetError::Protocol("extension unavailable".to_string()))
        }
        fn ack(&mut self, _seqs: &[u64]) -> Result<()> {
            Ok(())
        }
    }

    fn maple() -> FormattedMaterial {
        let raw = RawMaterial::new("1/8in", "Maple", 3.2, CutSetting::default());
        FormattedMaterial::from_raw(&raw, &MaterialId::from_title(&raw.title()))
    }

    fn bridge(
        background: &SharedBackground,
    ) -> ContentBridge<LocalSource, RecordingDispatcher> {
        ContentBridge::new(
            LocalSource::new(background.clone()),
            RecordingDispatcher::default(),
            Duration::from_millis(1),
            true,
        )
    }

    #[test]
    fn test_messages_map_to_actions_in_order() {
        let background = Background::shared(LocalStore::in_memory(), 16);
        let mut bridge = bridge(&background);
        let id = MaterialId::from_hash("abc1234");

        let response = MaterialCheckResponse {
            messages: vec![
                Envelope {
                    seq: 1,
                    message: BridgeMessage::SetMaterials {
                        materials: vec![maple()],
                    },
                },
                Envelope {
                    seq: 2,
                    message: BridgeMessage::Clone,
                },
                Envelope {
                    seq: 3,
                    message: BridgeMessage::ToggleUnits {
                        unit_type: UnitType::Metric,
                    },
                },
                Envelope {
                    seq: 4,
                    message: BridgeMessage::SelectMaterial {
                        material_id: id.clone(),
                    },
                },
                Envelope {
                    seq: 5,
                    message: BridgeMessage::SetMaterial { material: maple() },
                },
            ],
        };

        let handled = bridge.handle_material_check(response);
        assert_eq!(handled, vec![1, 2, 3, 4, 5]);
        assert_eq!(
            bridge.dispatcher().actions,
            vec![
                HostAction::AddMaterials {
                    materials: vec![maple()]
                },
                HostAction::SetUnits {
                    unit_type: UnitType::Metric
                },
                HostAction::SetMaterial { id },
                HostAction::AddMaterial { material: maple() },
            ]
        );
    }

    #[test]
    fn test_poll_acknowledges_handled_messages() {
        let store = LocalStore::in_memory();
        let background = Background::shared(store.clone(), 16);
        let mut bridge = bridge(&background);

        bridge.force_refresh();
        assert!(store.get_should_update().unwrap());
        assert_eq!(bridge.poll_once(), 1);
        assert!(!store.get_should_update().unwrap());

        // Acknowledged, so nothing comes back.
        assert_eq!(bridge.poll_once(), 0);
        assert_eq!(bridge.dispatcher().actions.len(), 1);
    }

    #[test]
    fn test_failures_are_swallowed() {
        let mut bridge = ContentBridge::new(
            FailingSource,
            RecordingDispatcher::default(),
            Duration::from_millis(1),
            false,
        );
        bridge.force_refresh();
        assert_eq!(bridge.poll_once(), 0);
    }

    #[test]
    fn test_run_stops_when_flag_cleared() {
        let background = Background::shared(LocalStore::in_memory(), 16);
        let mut bridge = bridge(&background);
        let running = AtomicBool::new(false);
        bridge.run(&running);
        // The one-shot refresh still happened.
        assert!(lock(&background)
            .unwrap()
            .store()
            .get_should_update()
            .unwrap());
    }

    #[test]
    fn test_json_lines_dispatcher() {
        let mut dispatcher = JsonLinesDispatcher::new(Vec::new());
        dispatcher
            .dispatch(HostAction::SetMaterial {
                id: MaterialId::from_hash("abc1234"),
            })
            .unwrap();
        dispatcher
            .dispatch(HostAction::SetUnits {
                unit_type: UnitType::Imperial,
            })
            .unwrap();
        let out = String::from_utf8(dispatcher.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"type":"SET_MATERIAL","id":"Custom:abc1234"}"#);
    }

    #[test]
    fn test_events_do_not_reach_the_page() {
        let background = Background::shared(LocalStore::in_memory(), 16);
        lock(&background)
            .unwrap()
            .post_event(HostEvent::Clone { design_id: None })
            .unwrap();
        let mut bridge = bridge(&background);
        assert_eq!(bridge.poll_once(), 0);
    }
}
