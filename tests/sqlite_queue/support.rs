#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use conveyor::prelude::*;
use conveyor::SqliteQueue;
use tempfile::TempDir;

/// A temp database plus a lazily connected handle to it.
pub struct TestDb {
    pub dir: TempDir,
    pub connection: Arc<Connection<SqliteConnector>>,
}

impl TestDb {
    pub fn new() -> Self {
        Self::with_options(|options| options)
    }

    pub fn with_options(
        configure: impl FnOnce(SqliteQueueOptions) -> SqliteQueueOptions,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let options = configure(SqliteQueueOptions::new(url(&dir)));
        let connection = Arc::new(
            Connection::new(SqliteConnector::new(options)).with_application_id("sqlite-tests"),
        );
        Self { dir, connection }
    }

    pub fn url(&self) -> String {
        url(&self.dir)
    }

    /// The queue client, connecting if needed.
    pub async fn queue(&self) -> Arc<SqliteQueue> {
        self.connection.ensure_connected().await.unwrap()
    }

    pub fn publisher(&self) -> Publisher<SqliteConnector> {
        Publisher::new(self.connection.clone())
    }
}

fn url(dir: &TempDir) -> String {
    format!("sqlite://{}", dir.path().join("bus.db").display())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Message)]
pub struct MyEvent {
    #[serde(rename = "Name")]
    pub name: String,
}

pub type Seen = Arc<Mutex<Vec<String>>>;

/// Records names; names starting with "fail" make the handler fail.
pub struct NameHandler {
    pub seen: Seen,
}

#[async_trait]
impl Handler<MyEvent> for NameHandler {
    async fn handle(&self, event: &MyEvent, args: &ProcessEventArgs) -> Result<(), BusError> {
        if event.name.starts_with("fail") {
            return Err(BusError::handler(format!("refusing {}", args.message_id)));
        }
        self.seen.lock().unwrap().push(event.name.clone());
        Ok(())
    }
}

pub fn processor(seen: &Seen) -> MessageProcessor {
    let seen = seen.clone();
    MessageProcessor::builder()
        .handle::<MyEvent, _, _>(move || NameHandler { seen: seen.clone() })
        .build()
        .unwrap()
}
