//! RegistryStore — redb-backed persistence for one VDB.
//!
//! Producer and consumer registrations are JSON values; producer predicate
//! columns are additionally written to typed index tables so that matching
//! can reject contradicting producers without re-parsing their predicates.
//!
//! Every mutation runs in a single redb write transaction. redb admits one
//! writer at a time, so a registration upsert together with its index rows
//! and a purge sweep are mutually exclusive per VDB database.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;

use gridreg_core::{
    ColumnType, ConsumerEntry, ConsumerRegistration, ProducerEntry, ProducerKey,
    ProducerRegistration, QueryProperties, Registration, RegistrationRef, ReplicationMessage,
    ResourceEndpoint, SchemaLookup, registration_key,
};
use gridreg_predicate::{ParsedPredicate, PredicateColumn, ProducerPredicate, contradicts};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

/// Keys of the rows in a registration table whose decoded value satisfies
/// the predicate.
macro_rules! matching_keys {
    ($table:expr, $keep:expr) => {{
        let keep = $keep;
        let mut keys: Vec<String> = Vec::new();
        for entry in $table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if keep(&decode(value.value())?) {
                keys.push(key.value().to_string());
            }
        }
        keys
    }};
}

/// Remove every row whose key starts with the prefix.
macro_rules! remove_prefixed {
    ($table:expr, $prefix:expr) => {{
        let mut keys: Vec<String> = Vec::new();
        for entry in $table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with($prefix) {
                keys.push(key.value().to_string());
            }
        }
        for key in &keys {
            $table.remove(key.as_str()).map_err(map_err!(Write))?;
        }
    }};
}

/// Number of rows in a table.
macro_rules! row_count {
    ($table:expr) => {{
        let mut n = 0usize;
        for entry in $table.iter().map_err(map_err!(Read))? {
            entry.map_err(map_err!(Read))?;
            n += 1;
        }
        n
    }};
}

/// Registration store for a single VDB.
#[derive(Clone)]
pub struct RegistryStore {
    db: Arc<Database>,
    vdb: String,
    schema: Arc<dyn SchemaLookup>,
    replication_lag_secs: u64,
}

impl RegistryStore {
    /// Open (or create) the store for `vdb` at the given path.
    pub fn open(path: &Path, vdb: &str, schema: Arc<dyn SchemaLookup>) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::with_database(db, vdb, schema);
        store.ensure_tables()?;
        debug!(?path, vdb, "registry store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory(vdb: &str, schema: Arc<dyn SchemaLookup>) -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::with_database(db, vdb, schema);
        store.ensure_tables()?;
        debug!(vdb, "in-memory registry store opened");
        Ok(store)
    }

    fn with_database(db: Database, vdb: &str, schema: Arc<dyn SchemaLookup>) -> Self {
        Self {
            db: Arc::new(db),
            vdb: vdb.to_string(),
            schema,
            replication_lag_secs: 0,
        }
    }

    /// Extra lifetime granted to rows written by replication.
    pub fn with_replication_lag(mut self, secs: u64) -> Self {
        self.replication_lag_secs = secs;
        self
    }

    pub fn vdb_name(&self) -> &str {
        &self.vdb
    }

    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(PRODUCERS).map_err(map_err!(Table))?;
        txn.open_table(CONSUMERS).map_err(map_err!(Table))?;
        txn.open_table(FIXED_INT).map_err(map_err!(Table))?;
        txn.open_table(FIXED_REAL).map_err(map_err!(Table))?;
        txn.open_table(FIXED_STRING).map_err(map_err!(Table))?;
        txn.open_table(INCOMING_REPLICATION).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Registrations ──────────────────────────────────────────────

    /// Insert or refresh a registration, resetting its last contact time.
    ///
    /// Non-master rows (written on behalf of a peer) get the replication lag
    /// added to their termination interval and remember `origin_host`.
    pub fn add_registration(
        &self,
        reg: &Registration,
        is_master: bool,
        origin_host: Option<&str>,
        now: u64,
    ) -> StoreResult<()> {
        check_key_parts(reg.table_name(), reg.endpoint())?;
        let fixed = match reg {
            Registration::Producer(p) => self.fixed_columns(p)?,
            Registration::Consumer(_) => Vec::new(),
        };
        let lag = if is_master { 0 } else { self.replication_lag_secs };
        let row = StoredRegistration {
            registration: reg.clone(),
            is_master,
            origin_host: if is_master {
                None
            } else {
                origin_host.map(str::to_string)
            },
            last_contact_secs: now,
            effective_termination_secs: reg.termination_interval_secs().saturating_add(lag),
        };
        let key = row.table_key();
        let value = serde_json::to_vec(&row).map_err(map_err!(Serialize))?;
        let definition = if reg.is_producer() { PRODUCERS } else { CONSUMERS };

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(definition).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        if reg.is_producer() {
            let mut ints = txn.open_table(FIXED_INT).map_err(map_err!(Table))?;
            let mut reals = txn.open_table(FIXED_REAL).map_err(map_err!(Table))?;
            let mut strings = txn.open_table(FIXED_STRING).map_err(map_err!(Table))?;
            let prefix = fixed_prefix(&key);
            remove_prefixed!(ints, &prefix);
            remove_prefixed!(reals, &prefix);
            remove_prefixed!(strings, &prefix);
            for (column, value) in &fixed {
                let fixed_key = format!("{prefix}{column}");
                match value {
                    FixedValue::Int(i) => {
                        ints.insert(fixed_key.as_str(), *i).map_err(map_err!(Write))?;
                    }
                    FixedValue::Real(r) => {
                        reals.insert(fixed_key.as_str(), *r).map_err(map_err!(Write))?;
                    }
                    FixedValue::Text(s) => {
                        strings
                            .insert(fixed_key.as_str(), s.as_str())
                            .map_err(map_err!(Write))?;
                    }
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(vdb = %self.vdb, %key, is_master, "registration stored");
        Ok(())
    }

    /// Typed index rows for a producer's predicate.
    fn fixed_columns(&self, producer: &ProducerRegistration) -> StoreResult<Vec<(String, FixedValue)>> {
        let predicate = ProducerPredicate::parse(&producer.predicate)?;
        let mut fixed = Vec::with_capacity(predicate.columns().len());
        for column in predicate.columns() {
            let ty = self
                .schema
                .column_type(&self.vdb, &producer.table_name, &column.name)
                .map_err(|e| StoreError::Schema(e.to_string()))?
                .unwrap_or_else(|| inferred_type(&column.value));
            let value = FixedValue::from_literal(&column.value, ty).ok_or_else(|| {
                StoreError::Schema(format!(
                    "value {} is not valid for {ty} column {}.{}",
                    column.value, producer.table_name, column.name
                ))
            })?;
            fixed.push((column.name.clone(), value));
        }
        Ok(fixed)
    }

    /// Delete a producer table registration, or every registration of a
    /// consumer endpoint. Returns the number of rows removed.
    pub fn delete_registration(&self, target: &RegistrationRef) -> StoreResult<usize> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let removed = match target {
            RegistrationRef::Producer(k) => {
                check_key_parts(&k.table_name, &k.endpoint)?;
                let key = registration_key(&k.table_name, &k.endpoint);
                let existed = {
                    let mut table = txn.open_table(PRODUCERS).map_err(map_err!(Table))?;
                    table.remove(key.as_str()).map_err(map_err!(Write))?.is_some()
                };
                remove_fixed_rows(&txn, &key)?;
                usize::from(existed)
            }
            RegistrationRef::Consumer { endpoint } => {
                let mut table = txn.open_table(CONSUMERS).map_err(map_err!(Table))?;
                let keys = matching_keys!(table, |row: &StoredRegistration| row.registration.endpoint() == endpoint);
                for key in &keys {
                    table.remove(key.as_str()).map_err(map_err!(Write))?;
                }
                keys.len()
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(vdb = %self.vdb, ?target, removed, "registration deleted");
        Ok(removed)
    }

    /// Delete every expired registration and the index rows of expired
    /// producers.
    pub fn purge_expired_registrations(&self, now: u64) -> StoreResult<PurgeStats> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut stats = PurgeStats::default();
        {
            let mut producers = txn.open_table(PRODUCERS).map_err(map_err!(Table))?;
            let expired = matching_keys!(producers, |row: &StoredRegistration| row.is_expired(now));
            for key in &expired {
                producers.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            stats.producers = expired.len();
            drop(producers);
            for key in &expired {
                remove_fixed_rows(&txn, key)?;
            }

            let mut consumers = txn.open_table(CONSUMERS).map_err(map_err!(Table))?;
            let expired = matching_keys!(consumers, |row: &StoredRegistration| row.is_expired(now));
            for key in &expired {
                consumers.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            stats.consumers = expired.len();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if stats.total() > 0 {
            debug!(vdb = %self.vdb, producers = stats.producers, consumers = stats.consumers, "expired registrations purged");
        }
        Ok(stats)
    }

    // ── Matching ───────────────────────────────────────────────────

    /// Producers of any of `table_names` that can serve the query and whose
    /// predicate does not contradict `predicate`.
    ///
    /// A non-simple predicate disables predicate filtering altogether.
    pub fn get_producers_matching_predicate(
        &self,
        table_names: &[String],
        predicate: &str,
        query: &QueryProperties,
        is_secondary: bool,
        now: u64,
    ) -> StoreResult<Vec<ProducerEntry>> {
        let parsed = ParsedPredicate::parse(predicate)?;
        let constraints: &[PredicateColumn] = if parsed.is_simple() {
            parsed.columns()
        } else {
            &[]
        };

        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let producers = txn.open_table(PRODUCERS).map_err(map_err!(Table))?;
        let ints = txn.open_table(FIXED_INT).map_err(map_err!(Table))?;
        let reals = txn.open_table(FIXED_REAL).map_err(map_err!(Table))?;
        let strings = txn.open_table(FIXED_STRING).map_err(map_err!(Table))?;

        let mut results = Vec::new();
        for entry in producers.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let row = decode(value.value())?;
            let Registration::Producer(p) = &row.registration else {
                continue;
            };
            if row.is_expired(now)
                || !table_names.iter().any(|t| t.eq_ignore_ascii_case(&p.table_name))
                || !query.is_served_by(&p.producer_type)
                || (is_secondary && p.producer_type.is_secondary)
            {
                continue;
            }

            let prefix = fixed_prefix(key.value());
            let mut contradicted = false;
            for constraint in constraints {
                let fixed_key = format!("{prefix}{}", constraint.name);
                let fixed = if let Some(v) = ints.get(fixed_key.as_str()).map_err(map_err!(Read))? {
                    Some(FixedValue::Int(v.value()))
                } else if let Some(v) = reals.get(fixed_key.as_str()).map_err(map_err!(Read))? {
                    Some(FixedValue::Real(v.value()))
                } else {
                    strings
                        .get(fixed_key.as_str())
                        .map_err(map_err!(Read))?
                        .map(|v| FixedValue::Text(v.value().to_string()))
                };
                if let Some(fixed) = fixed {
                    if constraint.is_contradicted_by(&fixed.to_literal(), fixed.column_type()) {
                        contradicted = true;
                        break;
                    }
                }
            }
            if !contradicted {
                results.push(ProducerEntry::from(p));
            }
        }
        Ok(results)
    }

    /// Continuous consumers of the producer's table whose predicate is not
    /// contradicted by the producer's predicate.
    pub fn get_consumers_matching_predicate(
        &self,
        producer: &ProducerRegistration,
        now: u64,
    ) -> StoreResult<Vec<ConsumerEntry>> {
        let producer_predicate = ProducerPredicate::parse(&producer.predicate)?;
        let column_type = |column: &str| -> Option<ColumnType> {
            self.schema
                .column_type(&self.vdb, &producer.table_name, column)
                .ok()
                .flatten()
        };

        let mut results = Vec::new();
        for row in self.scan(CONSUMERS)? {
            let Registration::Consumer(c) = &row.registration else {
                continue;
            };
            if row.is_expired(now)
                || !c.table_name.eq_ignore_ascii_case(&producer.table_name)
                || !c.query.is_continuous()
                || (producer.producer_type.is_secondary && c.is_secondary)
            {
                continue;
            }
            if consumer_accepts(c, &producer_predicate, &column_type) {
                results.push(ConsumerEntry {
                    endpoint: c.endpoint.clone(),
                });
            }
        }
        Ok(results)
    }

    /// Every live producer of a table.
    pub fn get_all_producers_for_table(&self, table_name: &str, now: u64) -> StoreResult<Vec<ProducerEntry>> {
        Ok(self
            .scan(PRODUCERS)?
            .iter()
            .filter(|row| !row.is_expired(now) && row.registration.table_name().eq_ignore_ascii_case(table_name))
            .filter_map(|row| match &row.registration {
                Registration::Producer(p) => Some(ProducerEntry::from(p)),
                Registration::Consumer(_) => None,
            })
            .collect())
    }

    // ── Replication support ────────────────────────────────────────

    /// Last replication timestamp accepted from `host` (0 if none).
    pub fn last_replication_time(&self, host: &str) -> StoreResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INCOMING_REPLICATION).map_err(map_err!(Table))?;
        Ok(table
            .get(host)
            .map_err(map_err!(Read))?
            .map_or(0, |v| v.value()))
    }

    pub fn set_last_replication_time(&self, host: &str, timestamp: u64) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(INCOMING_REPLICATION).map_err(map_err!(Table))?;
            table.insert(host, timestamp).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Every peer host we have accepted replication from, with its timestamp.
    pub fn incoming_replication_times(&self) -> StoreResult<Vec<(String, u64)>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INCOMING_REPLICATION).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            results.push((key.value().to_string(), value.value()));
        }
        Ok(results)
    }

    /// Producer registrations that were replicated from `host`.
    pub fn producers_from_remote(&self, host: &str) -> StoreResult<HashSet<ProducerKey>> {
        Ok(self
            .scan(PRODUCERS)?
            .into_iter()
            .filter(|row| row.origin_host.as_deref() == Some(host))
            .filter_map(|row| match row.registration {
                Registration::Producer(p) => Some(ProducerKey::new(p.table_name, p.endpoint)),
                Registration::Consumer(_) => None,
            })
            .collect())
    }

    /// Consumer endpoints that were replicated from `host`.
    pub fn consumers_from_remote(&self, host: &str) -> StoreResult<HashSet<ResourceEndpoint>> {
        Ok(self
            .scan(CONSUMERS)?
            .into_iter()
            .filter(|row| row.origin_host.as_deref() == Some(host))
            .map(|row| row.registration.endpoint().clone())
            .collect())
    }

    /// A full snapshot of the live registrations this replica is master for.
    pub fn get_full_update_records(&self, now: u64, origin_host: &str) -> StoreResult<ReplicationMessage> {
        let mut msg = ReplicationMessage::new(self.vdb.clone(), origin_host, now, 0);
        for row in self.scan(PRODUCERS)? {
            if let (true, false, Registration::Producer(p)) = (row.is_master, row.is_expired(now), row.registration) {
                msg.producers_added.push(p);
            }
        }
        for row in self.scan(CONSUMERS)? {
            if let (true, false, Registration::Consumer(c)) = (row.is_master, row.is_expired(now), row.registration) {
                msg.consumers_added.push(c);
            }
        }
        Ok(msg)
    }

    // ── Status ─────────────────────────────────────────────────────

    pub fn registered_producer_count(&self, master_only: bool) -> StoreResult<usize> {
        self.count(PRODUCERS, master_only)
    }

    pub fn registered_consumer_count(&self, master_only: bool) -> StoreResult<usize> {
        self.count(CONSUMERS, master_only)
    }

    fn count(&self, definition: TableDefinition<&str, &[u8]>, master_only: bool) -> StoreResult<usize> {
        if !master_only {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(definition).map_err(map_err!(Table))?;
            return Ok(row_count!(table));
        }
        Ok(self.scan(definition)?.iter().filter(|r| r.is_master).count())
    }

    /// Distinct hosts of every registered endpoint, sorted.
    pub fn unique_host_names(&self) -> StoreResult<Vec<String>> {
        let mut hosts = BTreeSet::new();
        for row in self.scan(PRODUCERS)?.into_iter().chain(self.scan(CONSUMERS)?) {
            hosts.insert(row.registration.endpoint().host().to_string());
        }
        Ok(hosts.into_iter().collect())
    }

    /// Distinct table names across producers and consumers, sorted.
    pub fn unique_table_names(&self) -> StoreResult<Vec<String>> {
        let mut tables = BTreeSet::new();
        for row in self.scan(PRODUCERS)?.into_iter().chain(self.scan(CONSUMERS)?) {
            tables.insert(row.registration.table_name().to_string());
        }
        Ok(tables.into_iter().collect())
    }

    pub fn producer_entries_for_table(&self, table_name: &str) -> StoreResult<Vec<RegistrationStatus>> {
        self.status_rows(PRODUCERS, |r| r.registration.table_name().eq_ignore_ascii_case(table_name))
    }

    pub fn consumer_entries_for_table(&self, table_name: &str) -> StoreResult<Vec<RegistrationStatus>> {
        self.status_rows(CONSUMERS, |r| r.registration.table_name().eq_ignore_ascii_case(table_name))
    }

    pub fn producer_entries_for_host(&self, host: &str) -> StoreResult<Vec<RegistrationStatus>> {
        self.status_rows(PRODUCERS, |r| r.registration.endpoint().host().eq_ignore_ascii_case(host))
    }

    pub fn consumer_entries_for_host(&self, host: &str) -> StoreResult<Vec<RegistrationStatus>> {
        self.status_rows(CONSUMERS, |r| r.registration.endpoint().host().eq_ignore_ascii_case(host))
    }

    fn status_rows(
        &self,
        definition: TableDefinition<&str, &[u8]>,
        keep: impl Fn(&StoredRegistration) -> bool,
    ) -> StoreResult<Vec<RegistrationStatus>> {
        Ok(self
            .scan(definition)?
            .iter()
            .filter(|r| keep(r))
            .map(StoredRegistration::to_status)
            .collect())
    }

    /// Fetch a stored row by registration (for tests and diagnostics).
    pub fn get_registration(&self, reg: &Registration) -> StoreResult<Option<StoredRegistration>> {
        let definition = if reg.is_producer() { PRODUCERS } else { CONSUMERS };
        let key = reg.table_key();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(definition).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Every stored producer row, master and replicated.
    pub fn list_producers(&self) -> StoreResult<Vec<StoredRegistration>> {
        self.scan(PRODUCERS)
    }

    /// Every stored consumer row, master and replicated.
    pub fn list_consumers(&self) -> StoreResult<Vec<StoredRegistration>> {
        self.scan(CONSUMERS)
    }

    /// Number of typed index rows (all three tables).
    pub fn fixed_column_count(&self) -> StoreResult<usize> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let ints = txn.open_table(FIXED_INT).map_err(map_err!(Table))?;
        let reals = txn.open_table(FIXED_REAL).map_err(map_err!(Table))?;
        let strings = txn.open_table(FIXED_STRING).map_err(map_err!(Table))?;
        Ok(row_count!(ints) + row_count!(reals) + row_count!(strings))
    }

    fn scan(&self, definition: TableDefinition<&str, &[u8]>) -> StoreResult<Vec<StoredRegistration>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(definition).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }
}

/// Whether a consumer should hear about a producer with this predicate.
fn consumer_accepts(
    consumer: &ConsumerRegistration,
    producer: &ProducerPredicate,
    column_type: &impl Fn(&str) -> Option<ColumnType>,
) -> bool {
    if consumer.predicate.trim().is_empty() {
        return true;
    }
    match ParsedPredicate::parse(&consumer.predicate) {
        Ok(parsed) if parsed.is_simple() => {
            !contradicts(parsed.columns(), producer.columns(), column_type)
        }
        Ok(_) => true,
        Err(e) => {
            warn!(endpoint = %consumer.endpoint, error = %e, "stored consumer predicate unparsable; treating as match-all");
            true
        }
    }
}

fn decode(bytes: &[u8]) -> StoreResult<StoredRegistration> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// `|` separates the parts of registration and index keys.
fn check_key_parts(table_name: &str, endpoint: &ResourceEndpoint) -> StoreResult<()> {
    if table_name.contains('|') {
        return Err(StoreError::InvalidKey(format!("table name '{table_name}' contains '|'")));
    }
    if endpoint.address.contains('|') {
        return Err(StoreError::InvalidKey(format!(
            "endpoint address '{}' contains '|'",
            endpoint.address
        )));
    }
    Ok(())
}

fn fixed_prefix(registration_key: &str) -> String {
    format!("{registration_key}|")
}

fn remove_fixed_rows(txn: &redb::WriteTransaction, registration_key: &str) -> StoreResult<()> {
    let prefix = fixed_prefix(registration_key);
    let mut ints = txn.open_table(FIXED_INT).map_err(map_err!(Table))?;
    remove_prefixed!(ints, &prefix);
    let mut reals = txn.open_table(FIXED_REAL).map_err(map_err!(Table))?;
    remove_prefixed!(reals, &prefix);
    let mut strings = txn.open_table(FIXED_STRING).map_err(map_err!(Table))?;
    remove_prefixed!(strings, &prefix);
    Ok(())
}
