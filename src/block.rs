/*! RustRX Block implementation

Blocks are the main building blocks of the receiver. They each do one
thing, and the graph connects their ports to process the data.

A block is shared between the graph, which runs it, and the receiver,
which adjusts its parameters and reads its measurements. That sharing goes
through a [`BlockHandle`].
*/
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::stream::{InputStreams, ItemType, OutputStreams};
use crate::{Error, Result};

/** Return type for all blocks.

This will let the scheduler know if more data could come out of this
block, or if it should just never bother calling it again.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockRet {
    /// The normal return. Something was consumed or produced.
    Ok,

    /// Block didn't produce anything this time, but has a background
    /// process (or a clock) that may suddenly produce.
    Pending,

    /// Produced nothing, because not enough input.
    Noop,

    /// Block indicates that it will never produce more output.
    ///
    /// Examples:
    /// * reading from file, without repeating, and file reached EOF.
    EOF,
}

/**
Block trait, that must be implemented for all blocks.
*/
pub trait Block {
    /** Name of block

    Not name of *instance* of block. But it may include the
    type. E.g. `FileSource<Complex>`.
     */
    fn block_name(&self) -> &'static str;

    /// Item types of the input ports. Fixed for the life of the block.
    fn inputs(&self) -> &[ItemType] {
        &[]
    }

    /// Item types of the output ports. Fixed for the life of the block.
    fn outputs(&self) -> &[ItemType] {
        &[]
    }

    /** Block work function

    # Args
    * `r`: Everything that arrived on the input ports since the last call.
      All of it is considered consumed when `work()` returns.
    * `w`: Output ports to write to.

    A pure source block will not use `r`, and a pure sink block won't
    use `w`.
     */
    fn work(&mut self, r: &InputStreams, w: &mut OutputStreams) -> Result<BlockRet>;
}

/// Unique identity of a block instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(usize);

impl BlockId {
    fn next() -> Self {
        static NEXT: AtomicUsize = AtomicUsize::new(1);
        BlockId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Static facts about a block, captured when its handle is created.
#[derive(Debug)]
pub struct BlockInfo {
    /// Block name.
    pub name: &'static str,

    /// Input port item types.
    pub inputs: Vec<ItemType>,

    /// Output port item types.
    pub outputs: Vec<ItemType>,
}

/// Type-erased block, as the graph holds it.
pub type DynNode = Arc<Mutex<dyn Block + Send>>;

/// Handle to a type-erased block.
pub type DynBlock = BlockHandle<dyn Block + Send>;

/** Shared handle to a block.

Clones refer to the same block. `B` is the view the holder gets through
[`BlockHandle::lock`]; the graph always sees the block as `dyn Block`.
*/
pub struct BlockHandle<B: ?Sized> {
    id: BlockId,
    info: Arc<BlockInfo>,
    typed: Arc<Mutex<B>>,
    node: DynNode,
}

impl<B: ?Sized> Clone for BlockHandle<B> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            info: self.info.clone(),
            typed: self.typed.clone(),
            node: self.node.clone(),
        }
    }
}

impl<B: ?Sized> std::fmt::Debug for BlockHandle<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}{}", self.info.name, self.id)
    }
}

impl<B: Block + Send + 'static> BlockHandle<B> {
    /// Wrap a block in a new handle.
    pub fn new(b: B) -> Self {
        let info = Arc::new(BlockInfo {
            name: b.block_name(),
            inputs: b.inputs().to_vec(),
            outputs: b.outputs().to_vec(),
        });
        let typed = Arc::new(Mutex::new(b));
        let node: DynNode = typed.clone();
        Self {
            id: BlockId::next(),
            info,
            typed,
            node,
        }
    }

    /// The concrete block, for coercing into another trait object view.
    pub(crate) fn typed(&self) -> Arc<Mutex<B>> {
        self.typed.clone()
    }
}

impl<B: ?Sized> BlockHandle<B> {
    /// Build a handle with another typed view of the same block.
    ///
    /// `typed` must be the same allocation as this handle's block, just
    /// coerced to another (trait object) type.
    pub(crate) fn with_view<U: ?Sized>(&self, typed: Arc<Mutex<U>>) -> BlockHandle<U> {
        BlockHandle {
            id: self.id,
            info: self.info.clone(),
            typed,
            node: self.node.clone(),
        }
    }

    /// Forget the concrete type, or the trait object view.
    #[must_use]
    pub fn erase(&self) -> DynBlock {
        BlockHandle {
            id: self.id,
            info: self.info.clone(),
            typed: self.node.clone(),
            node: self.node.clone(),
        }
    }

    /// Block instance id.
    #[must_use]
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Block name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.info.name
    }

    /// Port information.
    #[must_use]
    pub fn info(&self) -> &Arc<BlockInfo> {
        &self.info
    }

    /// The graph's view of the block.
    #[must_use]
    pub fn node(&self) -> &DynNode {
        &self.node
    }

    /// Lock the block, to adjust parameters or read state.
    ///
    /// Never hold this while locking the graph.
    pub fn lock(&self) -> Result<MutexGuard<'_, B>> {
        self.typed
            .lock()
            .map_err(|_| Error::msg(format!("block {}{} lock poisoned", self.info.name, self.id)))
    }
}
