//! Benchmark scenarios module

use memtab::types::{ProcessId, TableAccess, TableId, TableKind};
use memtab::{AllTablesReply, DbResult, Engine, TableOptions};
use parking_lot::RwLock;
use rand::Rng;
use rand::rngs::StdRng;

/// Scenario trait - defines a benchmark scenario
pub trait Scenario: Send + Sync {
    /// Prepare scenario (create shared tables, etc.)
    fn prepare(&self, engine: &Engine) -> DbResult<()>;

    /// Execute one iteration of the scenario on behalf of `process`
    fn execute(&self, engine: &Engine, process: ProcessId, rng: &mut StdRng) -> DbResult<()>;

    fn name(&self) -> &str;
}

const BENCH_OWNER: ProcessId = ProcessId(1);

fn shared_options() -> TableOptions {
    TableOptions::new(TableKind::Hash).access(TableAccess::Public)
}

/// Tables created by `prepare`, shared by every thread
#[derive(Default)]
struct SharedTables {
    ids: RwLock<Vec<TableId>>,
}

impl SharedTables {
    fn create(&self, engine: &Engine, tables: usize, rows: usize) -> DbResult<()> {
        let mut ids = self.ids.write();
        for t in 0..tables {
            let id = engine.create_table(BENCH_OWNER, &format!("bench{}", t), shared_options())?;
            for row in 0..rows {
                engine.insert(BENCH_OWNER, id, &(row as u64).to_be_bytes(), b"payload")?;
            }
            ids.push(id);
        }
        Ok(())
    }

    fn pick(&self, rng: &mut StdRng) -> TableId {
        let ids = self.ids.read();
        ids[rng.gen_range(0..ids.len())]
    }
}

/// Point lookup scenario - single key read from a shared table
pub struct PointLookup {
    tables: usize,
    rows: usize,
    shared: SharedTables,
}

impl PointLookup {
    pub fn new(tables: usize, rows: usize) -> Self {
        Self {
            tables: tables.max(1),
            rows: rows.max(1),
            shared: SharedTables::default(),
        }
    }
}

impl Scenario for PointLookup {
    fn prepare(&self, engine: &Engine) -> DbResult<()> {
        self.shared.create(engine, self.tables, self.rows)
    }

    fn execute(&self, engine: &Engine, process: ProcessId, rng: &mut StdRng) -> DbResult<()> {
        let id = self.shared.pick(rng);
        let key = (rng.gen_range(0..self.rows) as u64).to_be_bytes();
        engine.lookup(process, id, &key)?;
        Ok(())
    }

    fn name(&self) -> &str {
        "point_lookup"
    }
}

/// Write scenario - insert or overwrite a key in a shared table, hammering
/// the tables' memory counters
pub struct Write {
    tables: usize,
    rows: usize,
    shared: SharedTables,
}

impl Write {
    pub fn new(tables: usize, rows: usize) -> Self {
        Self {
            tables: tables.max(1),
            rows: rows.max(1),
            shared: SharedTables::default(),
        }
    }
}

impl Scenario for Write {
    fn prepare(&self, engine: &Engine) -> DbResult<()> {
        self.shared.create(engine, self.tables, 0)
    }

    fn execute(&self, engine: &Engine, process: ProcessId, rng: &mut StdRng) -> DbResult<()> {
        let id = self.shared.pick(rng);
        let key = (rng.gen_range(0..self.rows) as u64).to_be_bytes();
        let value = vec![0u8; rng.gen_range(8..128)];
        if rng.gen_bool(0.8) {
            engine.insert(process, id, &key, &value)
        } else {
            engine.remove_key(process, id, &key).map(|_| ())
        }
    }

    fn name(&self) -> &str {
        "write"
    }
}

/// Churn scenario - create, fill and delete a private table
pub struct Churn {
    rows: usize,
}

impl Churn {
    pub fn new(_tables: usize, rows: usize) -> Self {
        Self { rows: rows.min(64) }
    }
}

impl Scenario for Churn {
    fn prepare(&self, _engine: &Engine) -> DbResult<()> {
        Ok(())
    }

    fn execute(&self, engine: &Engine, process: ProcessId, rng: &mut StdRng) -> DbResult<()> {
        let kind = [TableKind::Hash, TableKind::Tree, TableKind::CaTree][rng.gen_range(0..3)];
        let id = engine.create_table(process, "churn", TableOptions::new(kind))?;
        for row in 0..self.rows {
            engine.insert(process, id, &(row as u64).to_be_bytes(), b"churn")?;
        }
        engine.delete_table(process, id)?;
        Ok(())
    }

    fn name(&self) -> &str {
        "churn"
    }
}

/// Fix-delete scenario - delete a table while fixed, then release it
pub struct FixDelete;

impl FixDelete {
    pub fn new(_tables: usize, _rows: usize) -> Self {
        Self
    }
}

impl Scenario for FixDelete {
    fn prepare(&self, _engine: &Engine) -> DbResult<()> {
        Ok(())
    }

    fn execute(&self, engine: &Engine, process: ProcessId, _rng: &mut StdRng) -> DbResult<()> {
        let id = engine.create_table(process, "fixed", TableOptions::default())?;
        engine.insert(process, id, b"k", b"v")?;
        engine.fix(process, id)?;
        engine.delete_table(process, id)?;
        engine.unfix(process, id)
    }

    fn name(&self) -> &str {
        "fix_delete"
    }
}

/// Enumerate scenario - request the table list while others churn
pub struct Enumerate {
    tables: usize,
    budget: usize,
    shared: SharedTables,
}

impl Enumerate {
    pub fn new(tables: usize, _rows: usize) -> Self {
        Self {
            tables: tables.max(1),
            budget: 16,
            shared: SharedTables::default(),
        }
    }
}

impl Scenario for Enumerate {
    fn prepare(&self, engine: &Engine) -> DbResult<()> {
        self.shared.create(engine, self.tables, 1)
    }

    fn execute(&self, engine: &Engine, process: ProcessId, rng: &mut StdRng) -> DbResult<()> {
        if rng.gen_bool(0.5) {
            if let AllTablesReply::Pending(_) = engine.all_tables(process, Some(self.budget)) {
                // Completion is delivered to whichever thread finishes the walk
                engine.handle_yielded_all_request(self.budget);
            }
        } else {
            Churn::new(0, 4).execute(engine, process, rng)?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "enumerate"
    }
}

pub fn by_name(name: &str, tables: usize, rows: usize) -> Option<Box<dyn Scenario>> {
    let scenario: Box<dyn Scenario> = match name {
        "point_lookup" => Box::new(PointLookup::new(tables, rows)),
        "write" => Box::new(Write::new(tables, rows)),
        "churn" => Box::new(Churn::new(tables, rows)),
        "fix_delete" => Box::new(FixDelete::new(tables, rows)),
        "enumerate" => Box::new(Enumerate::new(tables, rows)),
        _ => return None,
    };
    Some(scenario)
}
