#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use callbox::{Call, Client, ClientConfig};
use callbox_test::MockTransport;

pub fn client(mock: &MockTransport) -> Client {
    Client::new(mock.clone())
}

pub fn client_with(mock: &MockTransport, config: ClientConfig) -> Client {
    Client::builder()
        .transport(mock.clone())
        .config(config)
        .build()
}

/// Records labels from subscribers in the order they ran.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, label: impl Into<String>) {
        self.0.lock().unwrap().push(label.into());
    }

    /// Appends `label` when `call` settles, whichever way.
    pub fn track(&self, call: &Call, label: &str) {
        let (ok, err) = (self.clone(), self.clone());
        let (ok_label, err_label) = (label.to_owned(), label.to_owned());
        call.then(move |_| ok.record(ok_label))
            .catch(move |_| err.record(err_label));
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}
