//! In-memory source and observer for engine tests

use crate::progress::ProgressObserver;
use crate::source::{ContentSource, MemberPage, SourceError, SourceResult};
use crate::storage::{lock_store, SharedStore, Store};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

type PageKey = (String, Option<String>);

struct RaceInsert {
    store: SharedStore,
    table: String,
    id_column: String,
    identifier: String,
}

/// A [`ContentSource`] answering from scripted pages and contents
#[derive(Default)]
pub(crate) struct ScriptedSource {
    pages: HashMap<PageKey, MemberPage>,
    list_delay: Duration,
    fetch_delay: Duration,
    contents: HashMap<String, Option<String>>,
    listing_failures: Mutex<u32>,
    fetch_failures: Mutex<HashMap<String, u32>>,
    race: Mutex<Option<RaceInsert>>,
    list_calls: Mutex<Vec<PageKey>>,
    fetch_calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn page(
        mut self,
        category: &str,
        cursor: Option<&str>,
        members: &[&str],
        next_cursor: Option<&str>,
    ) -> Self {
        self.pages.insert(
            (category.to_string(), cursor.map(str::to_string)),
            MemberPage {
                members: members.iter().map(|m| m.to_string()).collect(),
                next_cursor: next_cursor.map(str::to_string),
            },
        );
        self
    }

    pub(crate) fn content(mut self, identifier: &str, content: &str) -> Self {
        self.contents
            .insert(identifier.to_string(), Some(content.to_string()));
        self
    }

    pub(crate) fn missing(mut self, identifier: &str) -> Self {
        self.contents.insert(identifier.to_string(), None);
        self
    }

    /// Delays every listing response
    pub(crate) fn list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = delay;
        self
    }

    /// Delays every content response
    pub(crate) fn fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    /// Fails the next `times` listing calls with HTTP 502
    pub(crate) fn fail_listings(self, times: u32) -> Self {
        *self.listing_failures.lock().unwrap() = times;
        self
    }

    /// Fails the next `times` fetches of any batch containing `identifier`
    pub(crate) fn fail_fetch_containing(self, identifier: &str, times: u32) -> Self {
        self.fetch_failures
            .lock()
            .unwrap()
            .insert(identifier.to_string(), times);
        self
    }

    /// Inserts `identifier` into the store behind the engine's back the
    /// first time a batch containing it is fetched
    pub(crate) fn race_insert(
        self,
        store: SharedStore,
        table: &str,
        id_column: &str,
        identifier: &str,
    ) -> Self {
        *self.race.lock().unwrap() = Some(RaceInsert {
            store,
            table: table.to_string(),
            id_column: id_column.to_string(),
            identifier: identifier.to_string(),
        });
        self
    }

    pub(crate) fn list_calls(&self) -> Vec<PageKey> {
        self.list_calls.lock().unwrap().clone()
    }

    pub(crate) fn fetch_calls(&self) -> Vec<Vec<String>> {
        self.fetch_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentSource for ScriptedSource {
    async fn list_category_members(
        &self,
        category: &str,
        cursor: Option<&str>,
    ) -> SourceResult<MemberPage> {
        let key = (category.to_string(), cursor.map(str::to_string));
        self.list_calls.lock().unwrap().push(key.clone());
        tokio::time::sleep(self.list_delay).await;

        {
            let mut failures = self.listing_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(SourceError::Http {
                    status: 502,
                    url: "https://wiki.test/api.php".to_string(),
                });
            }
        }

        self.pages
            .get(&key)
            .cloned()
            .ok_or_else(|| SourceError::Malformed(format!("no page scripted for {:?}", key)))
    }

    async fn fetch_content_batch(
        &self,
        identifiers: &[String],
    ) -> SourceResult<HashMap<String, Option<String>>> {
        self.fetch_calls.lock().unwrap().push(identifiers.to_vec());
        tokio::time::sleep(self.fetch_delay).await;

        {
            let mut failures = self.fetch_failures.lock().unwrap();
            for id in identifiers {
                if let Some(remaining) = failures.get_mut(id) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(SourceError::Malformed("connection reset".to_string()));
                    }
                }
            }
        }

        let race = {
            let mut race = self.race.lock().unwrap();
            let hit = race
                .as_ref()
                .is_some_and(|r| identifiers.contains(&r.identifier));
            if hit {
                race.take()
            } else {
                None
            }
        };
        if let Some(race) = race {
            lock_store(&race.store)
                .unwrap()
                .insert_records(
                    &race.table,
                    &race.id_column,
                    &[(race.identifier.clone(), "raced".to_string())],
                )
                .unwrap();
        }

        Ok(identifiers
            .iter()
            .map(|id| (id.clone(), self.contents.get(id).cloned().flatten()))
            .collect())
    }
}

/// Observer that keeps every event for later assertions
#[derive(Default)]
pub(crate) struct RecordingObserver {
    statuses: Mutex<Vec<(u64, u64, String)>>,
    logs: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub(crate) fn statuses(&self) -> Vec<(u64, u64, String)> {
        self.statuses.lock().unwrap().clone()
    }

    pub(crate) fn logs(&self) -> Vec<String> {
        self.logs.lock().unwrap().clone()
    }
}

impl ProgressObserver for RecordingObserver {
    fn on_status(&self, count: u64, total: u64, current: &str) {
        self.statuses
            .lock()
            .unwrap()
            .push((count, total, current.to_string()));
    }

    fn on_log(&self, message: &str) {
        self.logs.lock().unwrap().push(message.to_string());
    }
}
