use clap::Parser as ClapParser;
use std::process;

use store::{
    Access, ArenaSettings, CoalescePolicy, CollectionStats, Result, Store, StoreError,
    StoreSettings, ValueKind, VarId,
};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Rows in the synthetic table
    #[arg(long, default_value_t = 1000, help = "Number of records to build")]
    records: usize,

    /// Unreachable object pairs to leave behind
    #[arg(long, default_value_t = 100, help = "Number of object cycles to create")]
    cycles: usize,

    /// Appends to a single growing string
    #[arg(long, default_value_t = 1000, help = "Number of string appends")]
    strings: usize,

    #[arg(long, help = "Defer coalescing of free arena blocks")]
    deferred: bool,

    /// 0 collects once at the end
    #[arg(long, default_value_t = 10, help = "Collect after every K cycles")]
    collect_every: usize,

    #[arg(long, help = "Log at debug level")]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::from_default_env();
    if cli.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    let coalesce = if cli.deferred {
        CoalescePolicy::Deferred
    } else {
        CoalescePolicy::Immediate
    };
    let settings = StoreSettings {
        arena: ArenaSettings {
            coalesce,
            ..ArenaSettings::default()
        },
        ..StoreSettings::default()
    };
    let mut store = match Store::try_new(settings) {
        Ok(store) => store,
        Err(err) => {
            eprintln!("Invalid settings: {}", err);
            process::exit(1);
        }
    };

    if let Err(err) = run(&mut store, &cli) {
        eprintln!("Error: {}", err);
        process::exit(1);
    }
}

fn run(store: &mut Store, cli: &Cli) -> Result<()> {
    let saved = store.enter_frame(2)?;
    let table = VarId::local(0);
    let text = VarId::local(1);

    build_records(store, table, cli.records)?;
    build_string(store, text, cli.strings)?;
    mirror_table(store, table)?;

    let mut total = CollectionStats::default();
    for i in 0..cli.cycles {
        leave_cycle(store, i)?;
        if cli.collect_every > 0 && (i + 1) % cli.collect_every == 0 {
            accumulate(&mut total, store.collect()?);
        }
    }
    accumulate(&mut total, store.collect()?);
    print_stats(store, &total, "after workload");

    store.leave_frame(saved, 0, 0)?;
    store.arena().verify().map_err(StoreError::Internal)?;
    print_stats(store, &total, "after teardown");
    Ok(())
}

fn build_records(store: &mut Store, table: VarId, count: usize) -> Result<()> {
    let id = store.names().intern("id");
    let name = store.names().intern("name");
    store.array_init(table, ValueKind::Record, count)?;
    for i in 0..count {
        let row = store.array_element_ref(table, i)?;
        store.record_init_empty(row)?;
        let var = store.field_create(row, id, true)?;
        store.set_integer(var, i as i64)?;
        let var = store.field_create(row, name, true)?;
        store.set_string(var, &format!("row-{i}"))?;
    }

    // A copy shares every row until one of them is written.
    let snapshot = store.new_heap_slot()?;
    store.copy(snapshot, table)?;
    if count > 0 {
        let row = store.array_element_ref(snapshot, 0)?;
        let var = store.field_create(row, name, false)?;
        store.string_append(var, "-edited")?;
    }
    store.delete_heap_slot(snapshot)?;

    for i in (0..count).rev().step_by(2) {
        store.array_delete(table, i)?;
    }
    log::info!("vstore: table holds {} rows", store.array_len(table)?);
    Ok(())
}

fn build_string(store: &mut Store, text: VarId, appends: usize) -> Result<()> {
    store.set_string(text, "")?;
    for _ in 0..appends {
        store.string_append(text, "x")?;
    }
    Ok(())
}

fn mirror_table(store: &Store, table: VarId) -> Result<()> {
    let mut mirror = Store::with_names(store.settings().clone(), store.names().clone());
    let copy = mirror.new_heap_slot()?;
    mirror.transfer_from(copy, store, table)?;
    println!(
        "mirror: {} rows transferred, {} heap slots",
        mirror.array_len(copy)?,
        mirror.stats().heap_slots
    );
    Ok(())
}

fn leave_cycle(store: &mut Store, round: usize) -> Result<()> {
    let node = store.names().intern("Node");
    let peer = store.names().intern("peer");
    let payload = store.register_context_kind("payload");

    let a = store.new_heap_slot()?;
    let b = store.new_heap_slot()?;
    store.object_new(a, Some(node))?;
    store.object_new(b, Some(node))?;
    for (h, other) in [(a, b), (b, a)] {
        store.member_create(h, peer, Access::This, true, false, ValueKind::Object)?;
        store.member_set(h, peer, other, Access::This)?;
    }
    store.attach_context(a, payload, vec![0u8; 64], move |buf: Vec<u8>| {
        log::trace!("vstore: releasing {} byte payload of round {round}", buf.len());
        Ok(())
    })?;
    store.delete_heap_slot(a)?;
    store.delete_heap_slot(b)?;
    Ok(())
}

fn accumulate(total: &mut CollectionStats, pass: CollectionStats) {
    total.marked += pass.marked;
    total.swept += pass.swept;
    total.skipped_cells += pass.skipped_cells;
    total.destructors_run += pass.destructors_run;
}

fn print_stats(store: &Store, total: &CollectionStats, label: &str) {
    let stats = store.stats();
    println!("== {} ==", label);
    println!(
        "  slots:   heap {}/{}  stack {}  globals {}  pinned {}",
        stats.heap_slots, stats.heap_capacity, stats.stack_depth, stats.globals, stats.pinned
    );
    println!(
        "  objects: alive {}  dead {}",
        stats.objects_alive, stats.objects_dead
    );
    println!(
        "  arena:   capacity {}  used {}  free {}  blocks {}  free blocks {}",
        stats.arena.capacity,
        stats.arena.used_bytes,
        stats.arena.free_bytes,
        stats.arena.blocks,
        stats.arena.free_blocks
    );
    println!(
        "  gc:      marked {}  swept {}  skipped cells {}  destructors {}",
        total.marked, total.swept, total.skipped_cells, total.destructors_run
    );
}
