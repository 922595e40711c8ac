/*! Graphs contain blocks connected port to port, and run them.

The topology (blocks, connections, and samples in flight between them)
lives behind one mutex. The runner thread takes it between block runs, to
hand a block its input and collect its output, but not while the block
works. Anyone wanting to change the topology takes it through
[`Graph::lock`], which returns a [`MutationGuard`]; while the guard lives,
no samples move between blocks.

A block whose `work()` fails is logged and no longer scheduled. The rest of
the graph keeps running.

Changes made through a guard are recorded. [`MutationGuard::commit`] keeps
them. Dropping the guard without committing undoes them, newest first, so
an early return with `?` in the middle of a reconfiguration leaves the
graph as it was.
*/
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, error, info, trace, warn};

use crate::block::{BlockHandle, BlockId, BlockInfo, BlockRet, DynNode};
use crate::stream::{InputStreams, OutputStreams, Samples};
use crate::{Error, Result};

/// Most samples buffered on one input port before the oldest are dropped.
const MAX_PENDING: usize = 1 << 20;

/// One port of one block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    /// Block id.
    pub block: BlockId,

    /// Port number.
    pub port: usize,
}

/// A directed edge from an output port to an input port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Connection {
    /// Producing port.
    pub src: Endpoint,

    /// Consuming port.
    pub dst: Endpoint,
}

struct Node {
    block: DynNode,
    info: Arc<BlockInfo>,
    eof: bool,
    failed: bool,
    time: Duration,
    cpu_time: Duration,
}

impl Node {
    fn new<B: ?Sized>(h: &BlockHandle<B>) -> Self {
        Self {
            block: h.node().clone(),
            info: h.info().clone(),
            eof: false,
            failed: false,
            time: Duration::default(),
            cpu_time: Duration::default(),
        }
    }

    fn scheduled(&self) -> bool {
        !self.eof && !self.failed
    }
}

/// One block run, as handed out by [`Topology::prepare`].
struct Job {
    block: DynNode,
    info: Arc<BlockInfo>,
    r: InputStreams,
    w: OutputStreams,
}

#[derive(Default)]
struct Topology {
    nodes: BTreeMap<BlockId, Node>,
    edges: Vec<Connection>,
    pending: HashMap<Endpoint, Samples>,
    order: Option<Vec<BlockId>>,
    dropped: u64,
}

impl Topology {
    fn producer(&self, dst: Endpoint) -> Option<&Connection> {
        self.edges.iter().find(|c| c.dst == dst)
    }

    fn has_edges(&self, id: BlockId) -> bool {
        self.edges
            .iter()
            .any(|c| c.src.block == id || c.dst.block == id)
    }

    // True if `to` can be reached from `from` following edges.
    fn reaches(&self, from: BlockId, to: BlockId) -> bool {
        let mut stack = vec![from];
        let mut seen = Vec::new();
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if seen.contains(&id) {
                continue;
            }
            seen.push(id);
            stack.extend(
                self.edges
                    .iter()
                    .filter(|c| c.src.block == id)
                    .map(|c| c.dst.block),
            );
        }
        false
    }

    fn check_connect(
        &self,
        conn: &Connection,
        src: &BlockInfo,
        dst: &BlockInfo,
    ) -> Result<()> {
        let Some(st) = src.outputs.get(conn.src.port) else {
            return Err(Error::rejected(format!(
                "{}{} has no output port {}",
                src.name, conn.src.block, conn.src.port
            )));
        };
        let Some(dt) = dst.inputs.get(conn.dst.port) else {
            return Err(Error::rejected(format!(
                "{}{} has no input port {}",
                dst.name, conn.dst.block, conn.dst.port
            )));
        };
        if st != dt {
            return Err(Error::rejected(format!(
                "can't connect {st:?} output of {} to {dt:?} input of {}",
                src.name, dst.name
            )));
        }
        if let Some(p) = self.producer(conn.dst) {
            return Err(Error::rejected(format!(
                "input {} of {}{} already fed by {}:{}",
                conn.dst.port, dst.name, conn.dst.block, p.src.block, p.src.port
            )));
        }
        if self.reaches(conn.dst.block, conn.src.block) {
            return Err(Error::rejected(format!(
                "connecting {} to {} would create a loop",
                src.name, dst.name
            )));
        }
        Ok(())
    }

    fn order(&mut self) -> Vec<BlockId> {
        if let Some(o) = &self.order {
            return o.clone();
        }
        let mut indeg: BTreeMap<BlockId, usize> = self.nodes.keys().map(|k| (*k, 0)).collect();
        for c in &self.edges {
            *indeg.entry(c.dst.block).or_default() += 1;
        }
        let mut ready: VecDeque<BlockId> = indeg
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(k, _)| *k)
            .collect();
        let mut out = Vec::with_capacity(self.nodes.len());
        while let Some(id) = ready.pop_front() {
            out.push(id);
            for c in self.edges.iter().filter(|c| c.src.block == id) {
                if let Some(d) = indeg.get_mut(&c.dst.block) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push_back(c.dst.block);
                    }
                }
            }
        }
        self.order = Some(out.clone());
        out
    }

    fn deliver(&mut self, dst: Endpoint, s: Samples) -> Result<()> {
        let q = match self.pending.entry(dst) {
            std::collections::hash_map::Entry::Occupied(e) => {
                let q = e.into_mut();
                q.append(s)?;
                q
            }
            std::collections::hash_map::Entry::Vacant(e) => e.insert(s),
        };
        let dropped = q.keep_newest(MAX_PENDING);
        if dropped > 0 {
            self.dropped += dropped as u64;
            trace!("Consumer {dst:?} too slow, dropped {dropped} samples");
        }
        Ok(())
    }

    /// Take the input for one run of a block.
    ///
    /// `None` if the block has left the graph, or is no longer scheduled.
    fn prepare(&mut self, id: BlockId) -> Option<Job> {
        let (block, info) = match self.nodes.get(&id) {
            Some(n) if n.scheduled() => (n.block.clone(), n.info.clone()),
            _ => return None,
        };
        let inputs = info
            .inputs
            .iter()
            .enumerate()
            .map(|(port, t)| {
                let ep = Endpoint { block: id, port };
                self.producer(ep).is_some().then(|| {
                    self.pending
                        .remove(&ep)
                        .unwrap_or_else(|| Samples::empty(*t))
                })
            })
            .collect::<Vec<_>>();
        let connected = (0..info.outputs.len())
            .map(|port| {
                let ep = Endpoint { block: id, port };
                self.edges.iter().any(|c| c.src == ep)
            })
            .collect();
        let w = OutputStreams::new(&info.outputs, connected);
        Some(Job {
            block,
            info,
            r: InputStreams::new(inputs),
            w,
        })
    }

    /// Book the result of one block run, and pass its output downstream.
    /// Return true if anything moved.
    fn finish(
        &mut self,
        id: BlockId,
        info: &BlockInfo,
        ret: Result<BlockRet>,
        w: OutputStreams,
        time: Duration,
        cpu_time: Duration,
    ) -> Result<bool> {
        let Some(n) = self.nodes.get_mut(&id) else {
            trace!("{}{id} left the graph while running", info.name);
            return Ok(false);
        };
        n.time += time;
        n.cpu_time += cpu_time;
        let mut busy = false;
        match ret {
            Ok(BlockRet::Ok) => busy = true,
            Ok(BlockRet::Pending | BlockRet::Noop) => {}
            Ok(BlockRet::EOF) => {
                info!("{}{id} EOF, no longer scheduled", info.name);
                n.eof = true;
            }
            Err(e) => {
                error!("{}{id} failed, no longer scheduled: {e}", info.name);
                n.failed = true;
                return Ok(false);
            }
        }

        for (port, samples) in w.into_inner().into_iter().enumerate() {
            if samples.is_empty() {
                continue;
            }
            let src = Endpoint { block: id, port };
            let dsts: Vec<Endpoint> = self
                .edges
                .iter()
                .filter(|c| {
                    c.src == src && self.nodes.get(&c.dst.block).is_some_and(Node::scheduled)
                })
                .map(|c| c.dst)
                .collect();
            let Some((last, rest)) = dsts.split_last() else {
                continue;
            };
            busy = true;
            for dst in rest {
                self.deliver(*dst, samples.clone())?;
            }
            self.deliver(*last, samples)?;
        }
        Ok(busy)
    }
}

fn lock_topology(t: &Mutex<Topology>) -> Result<MutexGuard<'_, Topology>> {
    t.lock()
        .map_err(|_| Error::msg("flow graph topology lock poisoned"))
}

#[must_use]
pub(crate) fn get_cpu_time() -> Duration {
    use libc::{CLOCK_THREAD_CPUTIME_ID, clock_gettime, timespec};
    // SAFETY: Zeroing out a timespec struct is just all zeroes.
    let mut ts: timespec = unsafe { std::mem::zeroed() };
    // SAFETY: Local variable written my C function.
    let rc = unsafe { clock_gettime(CLOCK_THREAD_CPUTIME_ID, &mut ts) };
    if rc != 0 {
        return Duration::default();
    }
    Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32)
}

enum Undo {
    Connect {
        conn: Connection,
        added: Vec<BlockId>,
    },
    Disconnect {
        conn: Connection,
        removed: Vec<(BlockId, Node)>,
    },
}

/**
Exclusive access to the graph topology.

Obtained from [`Graph::lock`]. While this is alive no samples move between
blocks, and no block starts a new run. A block already in the middle of
`work()` finishes it, and its output goes wherever the topology says once
the guard is gone.

Every change is undone when the guard is dropped, unless
[`commit`](MutationGuard::commit) was called.

```
use rustrx::block::BlockHandle;
use rustrx::graph::Graph;
use rustrx::null_sink::NullSink;
use rustrx::multiply_const::MultiplyConst;
use rustrx::Float;

let g = Graph::new("doc");
let gain = BlockHandle::new(MultiplyConst::new(0.5));
let sink = BlockHandle::new(NullSink::<Float>::new());
{
    // Not committed, so rolled back.
    let mut m = g.lock()?;
    m.connect(&gain, 0, &sink, 0)?;
}
assert!(g.connections()?.is_empty());

let mut m = g.lock()?;
m.connect(&gain, 0, &sink, 0)?;
m.commit();
assert_eq!(g.connections()?.len(), 1);
# Ok::<(), rustrx::Error>(())
```
*/
pub struct MutationGuard<'a> {
    topo: MutexGuard<'a, Topology>,
    log: Vec<Undo>,
}

impl MutationGuard<'_> {
    /// Connect an output port to an input port.
    ///
    /// Blocks not yet in the graph are added.
    ///
    /// Rejected if either port doesn't exist, item types differ, the input
    /// port already has a producer, or the edge would create a loop.
    pub fn connect<A: ?Sized, B: ?Sized>(
        &mut self,
        src: &BlockHandle<A>,
        src_port: usize,
        dst: &BlockHandle<B>,
        dst_port: usize,
    ) -> Result<()> {
        let conn = Connection {
            src: Endpoint {
                block: src.id(),
                port: src_port,
            },
            dst: Endpoint {
                block: dst.id(),
                port: dst_port,
            },
        };
        self.topo.check_connect(&conn, src.info(), dst.info())?;
        let mut added = Vec::new();
        if !self.topo.nodes.contains_key(&src.id()) {
            self.topo.nodes.insert(src.id(), Node::new(src));
            added.push(src.id());
        }
        if !self.topo.nodes.contains_key(&dst.id()) {
            self.topo.nodes.insert(dst.id(), Node::new(dst));
            added.push(dst.id());
        }
        self.topo.edges.push(conn);
        self.topo.order = None;
        debug!("Connect {src:?}:{src_port} -> {dst:?}:{dst_port}");
        self.log.push(Undo::Connect { conn, added });
        Ok(())
    }

    /// Remove an edge.
    ///
    /// Blocks left without any connection are dropped from the graph.
    pub fn disconnect<A: ?Sized, B: ?Sized>(
        &mut self,
        src: &BlockHandle<A>,
        src_port: usize,
        dst: &BlockHandle<B>,
        dst_port: usize,
    ) -> Result<()> {
        let conn = Connection {
            src: Endpoint {
                block: src.id(),
                port: src_port,
            },
            dst: Endpoint {
                block: dst.id(),
                port: dst_port,
            },
        };
        let Some(pos) = self.topo.edges.iter().position(|c| *c == conn) else {
            return Err(Error::rejected(format!(
                "no connection {src:?}:{src_port} -> {dst:?}:{dst_port}"
            )));
        };
        self.topo.edges.remove(pos);
        self.topo.pending.remove(&conn.dst);
        let mut removed = Vec::new();
        for id in [conn.src.block, conn.dst.block] {
            if !self.topo.has_edges(id)
                && let Some(n) = self.topo.nodes.remove(&id)
            {
                removed.push((id, n));
            }
        }
        self.topo.order = None;
        debug!("Disconnect {src:?}:{src_port} -> {dst:?}:{dst_port}");
        self.log.push(Undo::Disconnect { conn, removed });
        Ok(())
    }

    /// Return true if the edge exists.
    #[must_use]
    pub fn is_connected<A: ?Sized, B: ?Sized>(
        &self,
        src: &BlockHandle<A>,
        src_port: usize,
        dst: &BlockHandle<B>,
        dst_port: usize,
    ) -> bool {
        let conn = Connection {
            src: Endpoint {
                block: src.id(),
                port: src_port,
            },
            dst: Endpoint {
                block: dst.id(),
                port: dst_port,
            },
        };
        self.topo.edges.contains(&conn)
    }

    /// Keep all changes made through this guard, and release the graph.
    pub fn commit(mut self) {
        if !self.log.is_empty() {
            debug!("Committed {} graph changes", self.log.len());
        }
        self.log.clear();
    }

    fn rollback(&mut self) {
        while let Some(u) = self.log.pop() {
            match u {
                Undo::Connect { conn, added } => {
                    self.topo.edges.retain(|c| *c != conn);
                    self.topo.pending.remove(&conn.dst);
                    for id in added {
                        self.topo.nodes.remove(&id);
                    }
                }
                Undo::Disconnect { conn, removed } => {
                    for (id, n) in removed {
                        self.topo.nodes.insert(id, n);
                    }
                    self.topo.edges.push(conn);
                }
            }
        }
        self.topo.order = None;
    }
}

impl Drop for MutationGuard<'_> {
    fn drop(&mut self) {
        if !self.log.is_empty() {
            warn!("Rolling back {} uncommitted graph changes", self.log.len());
            self.rollback();
        }
    }
}

/// A copy of the topology at one point in time.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Block names, by id.
    pub names: BTreeMap<BlockId, &'static str>,

    /// All connections.
    pub edges: Vec<Connection>,
}

impl Snapshot {
    /// Return true if some block named `src` feeds some block named `dst`.
    #[must_use]
    pub fn connected(&self, src: &str, dst: &str) -> bool {
        self.edges.iter().any(|c| {
            self.names.get(&c.src.block) == Some(&src) && self.names.get(&c.dst.block) == Some(&dst)
        })
    }

    /// Return true if a block with this name is in the graph.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.values().any(|n| *n == name)
    }

    /// Largest number of producers feeding any single input port.
    #[must_use]
    pub fn max_producers(&self) -> usize {
        let mut count: HashMap<Endpoint, usize> = HashMap::new();
        for c in &self.edges {
            *count.entry(c.dst).or_default() += 1;
        }
        count.values().copied().max().unwrap_or(0)
    }

    /// One line per connection, sorted.
    #[must_use]
    pub fn describe(&self) -> String {
        let name = |id: &BlockId| self.names.get(id).copied().unwrap_or("?");
        let mut lines: Vec<String> = self
            .edges
            .iter()
            .map(|c| {
                format!(
                    "{}{}:{} -> {}{}:{}\n",
                    name(&c.src.block),
                    c.src.block,
                    c.src.port,
                    name(&c.dst.block),
                    c.dst.block,
                    c.dst.port
                )
            })
            .collect();
        lines.sort();
        lines.concat()
    }
}

/**
A graph is a thing that RustRX runs, to let blocks "talk to each
other" via port connections.

# Example

```
use rustrx::block::BlockHandle;
use rustrx::graph::Graph;
use rustrx::multiply_const::MultiplyConst;
use rustrx::null_sink::NullSink;
use rustrx::source::SimSource;
use rustrx::complex_to_real::ComplexToReal;
use rustrx::Float;

let src = BlockHandle::new(SimSource::new(96_000.0));
let c2r = BlockHandle::new(ComplexToReal::new());
let gain = BlockHandle::new(MultiplyConst::new(0.1));
let sink = BlockHandle::new(NullSink::<Float>::new());
let mut g = Graph::new("example");
{
    let mut m = g.lock()?;
    m.connect(&src, 0, &c2r, 0)?;
    m.connect(&c2r, 0, &gain, 0)?;
    m.connect(&gain, 0, &sink, 0)?;
    m.commit();
}
g.start()?;
std::thread::sleep(std::time::Duration::from_millis(20));
g.stop()?;
# Ok::<(), rustrx::Error>(())
```
*/
pub struct Graph {
    name: String,
    topo: Arc<Mutex<Topology>>,
    runner: Option<std::thread::JoinHandle<Result<()>>>,
    cancel_token: CancellationToken,
    started: Option<Instant>,
    spent_time: Duration,
}

impl Graph {
    /// Create a new, empty, stopped flowgraph.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            topo: Arc::new(Mutex::new(Topology::default())),
            runner: None,
            cancel_token: CancellationToken::new(),
            started: None,
            spent_time: Duration::default(),
        }
    }

    /// Return true if the runner thread is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.runner.as_ref().is_some_and(|r| !r.is_finished())
    }

    /// Start streaming.
    ///
    /// A no-op if already running.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        if self.runner.is_some() {
            // Runner died on its own. Reap it before starting over.
            if let Err(e) = self.join_runner() {
                warn!("Previous run of graph {} failed: {e}", self.name);
            }
        }
        self.cancel_token = CancellationToken::new();
        let cancel = self.cancel_token.clone();
        let topo = self.topo.clone();
        let name = self.name.clone();
        let th = std::thread::Builder::new()
            .name(format!("graph {}", self.name))
            .spawn(move || -> Result<()> {
                let ret = run_loop(&topo, &cancel);
                if let Err(e) = &ret {
                    error!("Graph {name} runner failed: {e}");
                }
                ret
            })
            .map_err(|e| Error::wrap(e.into(), "failed to spawn graph runner"))?;
        self.runner = Some(th);
        self.started = Some(Instant::now());
        info!("Graph {} started", self.name);
        Ok(())
    }

    /// Stop streaming, and wait for the runner to finish its current pass.
    ///
    /// A no-op if not running. Returns the runner's error, if it failed.
    pub fn stop(&mut self) -> Result<()> {
        if self.runner.is_none() {
            return Ok(());
        }
        self.cancel_token.cancel();
        let ret = self.join_runner();
        if let Some(st) = self.started.take() {
            self.spent_time += st.elapsed();
        }
        if let Some(stats) = self.generate_stats() {
            for line in stats.split('\n') {
                if !line.is_empty() {
                    info!("{line}");
                }
            }
        }
        info!("Graph {} stopped", self.name);
        ret
    }

    fn join_runner(&mut self) -> Result<()> {
        let Some(th) = self.runner.take() else {
            return Ok(());
        };
        match th.join() {
            Ok(r) => r.map_err(|e| Error::wrap(e, format!("graph {}", self.name))),
            Err(_) => Err(Error::msg(format!("graph {} runner panicked", self.name))),
        }
    }

    /// Get exclusive access to the topology.
    ///
    /// Waits at most for the runner to hand out or collect one block run,
    /// never for a block's `work()`.
    pub fn lock(&self) -> Result<MutationGuard<'_>> {
        Ok(MutationGuard {
            topo: lock_topology(&self.topo)?,
            log: Vec::new(),
        })
    }

    /// All current connections.
    pub fn connections(&self) -> Result<Vec<Connection>> {
        Ok(lock_topology(&self.topo)?.edges.clone())
    }

    /// Copy of the current topology, with block names.
    pub fn snapshot(&self) -> Result<Snapshot> {
        let t = lock_topology(&self.topo)?;
        Ok(Snapshot {
            names: t.nodes.iter().map(|(id, n)| (*id, n.info.name)).collect(),
            edges: t.edges.clone(),
        })
    }

    /// Blocks that failed, and are no longer scheduled.
    pub fn failed(&self) -> Result<Vec<(BlockId, &'static str)>> {
        Ok(lock_topology(&self.topo)?
            .nodes
            .iter()
            .filter(|(_, n)| n.failed)
            .map(|(id, n)| (*id, n.info.name))
            .collect())
    }

    /// Number of samples dropped because a consumer couldn't keep up.
    pub fn dropped(&self) -> Result<u64> {
        Ok(lock_topology(&self.topo)?.dropped)
    }

    /// Return a string with stats about where time went.
    #[must_use]
    pub fn generate_stats(&self) -> Option<String> {
        let t = self.topo.lock().ok()?;
        if t.nodes.is_empty() {
            return None;
        }
        let elapsed = self.spent_time.as_secs_f64();
        let total = t
            .nodes
            .values()
            .map(|n| n.time)
            .sum::<Duration>()
            .as_secs_f64();
        let block_cpu = t
            .nodes
            .values()
            .map(|n| n.cpu_time)
            .sum::<Duration>()
            .as_secs_f64();
        let names: Vec<String> = t
            .nodes
            .iter()
            .map(|(id, n)| format!("{}{id}", n.info.name))
            .collect();
        let ml = names.iter().map(|b| b.len()).max().unwrap_or(0);
        let ml = std::cmp::max(ml, "Elapsed seconds".len());

        let dashes = "-".repeat(ml + 38) + "\n";
        let (secw, secd) = (10, 3);
        let (pw, pd) = (7, 2);

        let pct = |a: f64, b: f64| if b > 0.0 { 100.0 * a / b } else { 0.0 };
        let mut s: String = format!(
            "{:<width$}    Seconds  Percent    CPU sec     CPU%\n",
            "Block name",
            width = ml
        );
        s.push_str(&dashes);
        for (name, n) in names.iter().zip(t.nodes.values()) {
            s.push_str(&format!(
                "{:<width$} {:secw$.secd$} {:>pw$.pd$}% {:secw$.secd$} {:>pw$.pd$}%\n",
                name,
                n.time.as_secs_f32(),
                pct(n.time.as_secs_f64(), total),
                n.cpu_time.as_secs_f32(),
                pct(n.cpu_time.as_secs_f64(), block_cpu),
                width = ml,
            ));
        }
        s.push_str(&dashes);
        s.push_str(&format!(
            "{:<width$} {total:secw$.secd$} {:>pw$.pd$}% {block_cpu:secw$.secd$}\n",
            "All blocks",
            pct(total, elapsed),
            width = ml,
        ));
        s.push_str(&format!(
            "{:<width$} {elapsed:secw$.secd$} {:>pw$.pd$}%\n",
            "Elapsed seconds",
            100.0,
            width = ml,
        ));
        if t.dropped > 0 {
            s.push_str(&format!("Dropped samples: {}\n", t.dropped));
        }
        Some(s)
    }
}

/// Run every block once, sources first. Return true if anything moved.
///
/// The block's own lock is taken before the topology lock is let go, so a
/// block that left the graph is never started after whoever removed it got
/// hold of it.
fn run_pass(topo: &Mutex<Topology>) -> Result<bool> {
    let mut busy = false;
    let order = lock_topology(topo)?.order();
    for id in order {
        let mut t = lock_topology(topo)?;
        let Some(Job {
            block,
            info,
            r,
            mut w,
        }) = t.prepare(id)
        else {
            continue;
        };
        let st = Instant::now();
        let st_cpu = get_cpu_time();
        let ret = match block.lock() {
            Ok(mut b) => {
                drop(t);
                b.work(&r, &mut w)
            }
            Err(_) => {
                drop(t);
                Err(Error::msg("block lock poisoned"))
            }
        };
        let (time, cpu_time) = (st.elapsed(), get_cpu_time().saturating_sub(st_cpu));
        busy |= lock_topology(topo)?.finish(id, &info, ret, w, time, cpu_time)?;
    }
    Ok(busy)
}

fn run_loop(topo: &Mutex<Topology>, cancel: &CancellationToken) -> Result<()> {
    let idle_sleep = Duration::from_millis(1);
    while !cancel.is_canceled() {
        let busy = run_pass(topo)?;
        if !busy {
            trace!("No output or consumption from any block. Sleeping a bit.");
            std::thread::sleep(idle_sleep);
        }
    }
    Ok(())
}

impl Drop for Graph {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("Stopping graph {} on drop: {e}", self.name);
        }
    }
}

/** A handle to be able to stop the Graph runner.

```
use rustrx::graph::CancellationToken;
use std::thread;

let token = CancellationToken::new();

// Confirm it defaults to not cancelled.
assert!(!token.is_canceled());

// Start a thread that will cancel the token.
let tt = token.clone();
thread::spawn(move || {
   tt.cancel();
});

// This would normally be the runner loop.
while !token.is_canceled() {}
```
*/
#[derive(Clone, Debug)]
pub struct CancellationToken {
    inner: Arc<std::sync::atomic::AtomicBool>,
}

impl CancellationToken {
    /// Create new cancellation token.
    pub fn new() -> Self {
        CancellationToken {
            inner: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    /// Mark the token cancelled.
    pub fn cancel(&self) {
        self.inner.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    /// Check if the token is cancelled.
    pub fn is_canceled(&self) -> bool {
        self.inner.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::stream::{InputStreams, ItemType, OutputStreams};
    use crate::{Complex, Float};

    /// Emit a fixed number of ones, then EOF.
    struct Ones {
        left: usize,
    }
    impl Block for Ones {
        fn block_name(&self) -> &'static str {
            "Ones"
        }
        fn outputs(&self) -> &[ItemType] {
            &[ItemType::Float]
        }
        fn work(&mut self, _r: &InputStreams, w: &mut OutputStreams) -> Result<BlockRet> {
            if self.left == 0 {
                return Ok(BlockRet::EOF);
            }
            let n = self.left.min(100);
            self.left -= n;
            w.write(0, vec![1.0 as Float; n])?;
            Ok(BlockRet::Ok)
        }
    }

    /// Pass floats through.
    struct Pass;
    impl Block for Pass {
        fn block_name(&self) -> &'static str {
            "Pass"
        }
        fn inputs(&self) -> &[ItemType] {
            &[ItemType::Float, ItemType::Float]
        }
        fn outputs(&self) -> &[ItemType] {
            &[ItemType::Float]
        }
        fn work(&mut self, r: &InputStreams, w: &mut OutputStreams) -> Result<BlockRet> {
            w.write_slice(0, r.get::<Float>(0))?;
            w.write_slice(0, r.get::<Float>(1))?;
            Ok(BlockRet::Noop)
        }
    }

    /// Count floats.
    #[derive(Default)]
    struct Count {
        n: usize,
    }
    impl Block for Count {
        fn block_name(&self) -> &'static str {
            "Count"
        }
        fn inputs(&self) -> &[ItemType] {
            &[ItemType::Float]
        }
        fn work(&mut self, r: &InputStreams, _w: &mut OutputStreams) -> Result<BlockRet> {
            self.n += r.get::<Float>(0).len();
            Ok(BlockRet::Noop)
        }
    }

    /// Complex sink, to test type checks.
    struct CSink;
    impl Block for CSink {
        fn block_name(&self) -> &'static str {
            "CSink"
        }
        fn inputs(&self) -> &[ItemType] {
            &[ItemType::Complex]
        }
        fn work(&mut self, r: &InputStreams, _w: &mut OutputStreams) -> Result<BlockRet> {
            let _ = r.get::<Complex>(0);
            Ok(BlockRet::Noop)
        }
    }

    #[test]
    fn connect_rejections() -> Result<()> {
        let g = Graph::new("test");
        let src = BlockHandle::new(Ones { left: 1 });
        let src2 = BlockHandle::new(Ones { left: 1 });
        let pass = BlockHandle::new(Pass);
        let csink = BlockHandle::new(CSink);
        let mut m = g.lock()?;
        // No such ports.
        assert!(matches!(m.connect(&src, 1, &pass, 0), Err(Error::Rejected(_))));
        assert!(matches!(m.connect(&src, 0, &pass, 2), Err(Error::Rejected(_))));
        // Wrong type.
        assert!(matches!(m.connect(&src, 0, &csink, 0), Err(Error::Rejected(_))));
        // One producer per input.
        m.connect(&src, 0, &pass, 0)?;
        assert!(matches!(m.connect(&src2, 0, &pass, 0), Err(Error::Rejected(_))));
        // But another input port is fine, and so is fan-out.
        m.connect(&src2, 0, &pass, 1)?;
        // Loop.
        assert!(matches!(m.connect(&pass, 0, &pass, 0), Err(Error::Rejected(_))));
        // Disconnecting something not connected.
        assert!(matches!(
            m.disconnect(&src2, 0, &pass, 0),
            Err(Error::Rejected(_))
        ));
        m.commit();
        assert_eq!(g.connections()?.len(), 2);
        assert_eq!(g.snapshot()?.max_producers(), 1);
        Ok(())
    }

    #[test]
    fn rollback_on_drop() -> Result<()> {
        let g = Graph::new("test");
        let src = BlockHandle::new(Ones { left: 1 });
        let a = BlockHandle::new(Count::default());
        let b = BlockHandle::new(Count::default());
        {
            let mut m = g.lock()?;
            m.connect(&src, 0, &a, 0)?;
            m.commit();
        }
        let before = g.connections()?;
        {
            let mut m = g.lock()?;
            m.disconnect(&src, 0, &a, 0)?;
            m.connect(&src, 0, &b, 0)?;
            assert!(m.is_connected(&src, 0, &b, 0));
            // Dropped without commit.
        }
        assert_eq!(g.connections()?, before);
        let snap = g.snapshot()?;
        assert_eq!(snap.names.len(), 2);
        assert!(snap.connected("Ones", "Count"));
        Ok(())
    }

    #[test]
    fn unconnected_blocks_leave_graph() -> Result<()> {
        let g = Graph::new("test");
        let src = BlockHandle::new(Ones { left: 1 });
        let a = BlockHandle::new(Count::default());
        let mut m = g.lock()?;
        m.connect(&src, 0, &a, 0)?;
        m.disconnect(&src, 0, &a, 0)?;
        m.commit();
        assert!(g.snapshot()?.names.is_empty());
        Ok(())
    }

    #[test]
    fn run_until_eof() -> Result<()> {
        let mut g = Graph::new("test");
        let src = BlockHandle::new(Ones { left: 1000 });
        let pass = BlockHandle::new(Pass);
        let a = BlockHandle::new(Count::default());
        let b = BlockHandle::new(Count::default());
        {
            let mut m = g.lock()?;
            m.connect(&src, 0, &pass, 0)?;
            m.connect(&pass, 0, &a, 0)?;
            m.connect(&pass, 0, &b, 0)?;
            m.commit();
        }
        g.start()?;
        // Starting twice is fine.
        g.start()?;
        assert!(g.is_running());
        let deadline = Instant::now() + Duration::from_secs(10);
        while b.lock()?.n < 1000 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        g.stop()?;
        g.stop()?;
        assert!(!g.is_running());
        assert_eq!(a.lock()?.n, 1000);
        assert_eq!(b.lock()?.n, 1000);
        assert!(g.generate_stats().is_some());
        Ok(())
    }

    /// Fail on the first input.
    #[derive(Default)]
    struct Fail {
        calls: usize,
    }
    impl Block for Fail {
        fn block_name(&self) -> &'static str {
            "Fail"
        }
        fn inputs(&self) -> &[ItemType] {
            &[ItemType::Float]
        }
        fn work(&mut self, r: &InputStreams, _w: &mut OutputStreams) -> Result<BlockRet> {
            if r.get::<Float>(0).is_empty() {
                return Ok(BlockRet::Noop);
            }
            self.calls += 1;
            Err(Error::msg("disk full"))
        }
    }

    /// Sink taking its time over every run.
    struct Slow {
        working: Arc<std::sync::atomic::AtomicBool>,
    }
    impl Block for Slow {
        fn block_name(&self) -> &'static str {
            "Slow"
        }
        fn inputs(&self) -> &[ItemType] {
            &[ItemType::Float]
        }
        fn work(&mut self, _r: &InputStreams, _w: &mut OutputStreams) -> Result<BlockRet> {
            self.working.store(true, std::sync::atomic::Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(500));
            self.working.store(false, std::sync::atomic::Ordering::SeqCst);
            Ok(BlockRet::Noop)
        }
    }

    #[test]
    fn failed_block_is_isolated() -> Result<()> {
        let mut g = Graph::new("test");
        let src = BlockHandle::new(Ones { left: usize::MAX });
        let a = BlockHandle::new(Count::default());
        let bad = BlockHandle::new(Fail::default());
        {
            let mut m = g.lock()?;
            m.connect(&src, 0, &a, 0)?;
            m.connect(&src, 0, &bad, 0)?;
            m.commit();
        }
        g.start()?;
        let deadline = Instant::now() + Duration::from_secs(10);
        while a.lock()?.n < 100_000 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(g.is_running());
        assert!(a.lock()?.n >= 100_000);
        assert_eq!(bad.lock()?.calls, 1);
        assert_eq!(g.failed()?, vec![(bad.id(), "Fail")]);
        // Still connected, just not run.
        assert!(g.snapshot()?.connected("Ones", "Fail"));
        assert_eq!(g.dropped()?, 0);
        g.stop()?;

        // Connected again as a fresh node, it gets another chance.
        {
            let mut m = g.lock()?;
            m.disconnect(&src, 0, &bad, 0)?;
            m.connect(&src, 0, &bad, 0)?;
            m.commit();
        }
        assert!(g.failed()?.is_empty());
        Ok(())
    }

    #[test]
    fn changes_while_block_works() -> Result<()> {
        let mut g = Graph::new("test");
        let src = BlockHandle::new(Ones { left: usize::MAX });
        let working = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let slow = BlockHandle::new(Slow {
            working: working.clone(),
        });
        let a = BlockHandle::new(Count::default());
        {
            let mut m = g.lock()?;
            m.connect(&src, 0, &slow, 0)?;
            m.commit();
        }
        g.start()?;
        let deadline = Instant::now() + Duration::from_secs(10);
        while !working.load(std::sync::atomic::Ordering::SeqCst) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(working.load(std::sync::atomic::Ordering::SeqCst));
        let st = Instant::now();
        {
            let mut m = g.lock()?;
            m.connect(&src, 0, &a, 0)?;
            m.commit();
        }
        let took = st.elapsed();
        assert!(took < Duration::from_millis(250), "graph change took {took:?}");
        while a.lock()?.n == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        g.stop()?;
        assert!(a.lock()?.n > 0);
        Ok(())
    }

    #[test]
    fn canceller() -> Result<()> {
        let cancel = CancellationToken::default();
        assert!(!cancel.is_canceled());
        cancel.cancel();
        assert!(cancel.is_canceled());
        Ok(())
    }
}
/* vim: textwidth=80
 */
