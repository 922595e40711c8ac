/*! Sample buffers passed between block ports.

Every port carries one item type, either real ([`Float`]) or I/Q
([`Complex`]) samples. The graph hands each block an [`InputStreams`] with
everything that has arrived on its connected input ports since the last
call, and collects whatever the block writes to its [`OutputStreams`].

Blocks consume all their input on every call. Blocks that need history
(filters, resamplers) keep it internally.
*/
use crate::{Complex, Error, Float, Result};

/// The type of item carried by a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemType {
    /// Real samples.
    Float,

    /// I/Q samples.
    Complex,
}

impl ItemType {
    /// A one port list of this type.
    #[must_use]
    pub fn one(self) -> &'static [ItemType] {
        match self {
            ItemType::Float => &[ItemType::Float],
            ItemType::Complex => &[ItemType::Complex],
        }
    }
}

/// A typed batch of samples.
#[derive(Clone, Debug, PartialEq)]
pub enum Samples {
    /// Real samples.
    Float(Vec<Float>),

    /// I/Q samples.
    Complex(Vec<Complex>),
}

impl Samples {
    /// Create an empty batch of the given type.
    #[must_use]
    pub fn empty(t: ItemType) -> Self {
        match t {
            ItemType::Float => Samples::Float(Vec::new()),
            ItemType::Complex => Samples::Complex(Vec::new()),
        }
    }

    /// Item type of the batch.
    #[must_use]
    pub fn item_type(&self) -> ItemType {
        match self {
            Samples::Float(_) => ItemType::Float,
            Samples::Complex(_) => ItemType::Complex,
        }
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Samples::Float(v) => v.len(),
            Samples::Complex(v) => v.len(),
        }
    }

    /// True if there are no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append another batch of the same type.
    pub fn append(&mut self, other: Samples) -> Result<()> {
        match (self, other) {
            (Samples::Float(a), Samples::Float(b)) => a.extend(b),
            (Samples::Complex(a), Samples::Complex(b)) => a.extend(b),
            (a, b) => {
                return Err(Error::msg(format!(
                    "can't append {:?} samples to {:?} stream",
                    b.item_type(),
                    a.item_type()
                )));
            }
        }
        Ok(())
    }

    /// Drop the oldest samples so that at most `max` remain.
    ///
    /// Returns the number of samples dropped.
    pub fn keep_newest(&mut self, max: usize) -> usize {
        fn trim<T>(v: &mut Vec<T>, max: usize) -> usize {
            if v.len() <= max {
                return 0;
            }
            let n = v.len() - max;
            v.drain(..n);
            n
        }
        match self {
            Samples::Float(v) => trim(v, max),
            Samples::Complex(v) => trim(v, max),
        }
    }
}

/// Sample types that can flow through a port.
pub trait StreamItem: Copy + Send + 'static {
    /// Port item type of this sample type.
    const ITEM_TYPE: ItemType;

    /// Borrow the samples, if the batch is of this type.
    fn slice(s: &Samples) -> Option<&[Self]>;

    /// Wrap samples into a batch.
    fn wrap(v: Vec<Self>) -> Samples;
}

impl StreamItem for Float {
    const ITEM_TYPE: ItemType = ItemType::Float;
    fn slice(s: &Samples) -> Option<&[Self]> {
        match s {
            Samples::Float(v) => Some(v),
            Samples::Complex(_) => None,
        }
    }
    fn wrap(v: Vec<Self>) -> Samples {
        Samples::Float(v)
    }
}

impl StreamItem for Complex {
    const ITEM_TYPE: ItemType = ItemType::Complex;
    fn slice(s: &Samples) -> Option<&[Self]> {
        match s {
            Samples::Complex(v) => Some(v),
            Samples::Float(_) => None,
        }
    }
    fn wrap(v: Vec<Self>) -> Samples {
        Samples::Complex(v)
    }
}

/// Input ports of a block, as seen during one `work()` call.
///
/// Unconnected ports are `None`.
#[derive(Debug, Default)]
pub struct InputStreams {
    ports: Vec<Option<Samples>>,
}

impl InputStreams {
    /// Create new input set.
    #[must_use]
    pub fn new(ports: Vec<Option<Samples>>) -> Self {
        Self { ports }
    }

    /// Get the samples available on a port.
    ///
    /// An unconnected port, or a port of another type, reads as empty.
    #[must_use]
    pub fn get<T: StreamItem>(&self, port: usize) -> &[T] {
        self.ports
            .get(port)
            .and_then(|p| p.as_ref())
            .and_then(T::slice)
            .unwrap_or(&[])
    }

    /// Return true if something feeds this port.
    #[must_use]
    pub fn is_connected(&self, port: usize) -> bool {
        matches!(self.ports.get(port), Some(Some(_)))
    }

    /// Total number of samples across all ports.
    #[must_use]
    pub fn available(&self) -> usize {
        self.ports.iter().flatten().map(Samples::len).sum()
    }
}

/// Output ports of a block, as seen during one `work()` call.
#[derive(Debug)]
pub struct OutputStreams {
    ports: Vec<Samples>,
    connected: Vec<bool>,
}

impl OutputStreams {
    /// Create new output set, with one empty batch per port.
    #[must_use]
    pub fn new(types: &[ItemType], connected: Vec<bool>) -> Self {
        Self {
            ports: types.iter().map(|t| Samples::empty(*t)).collect(),
            connected,
        }
    }

    /// Return true if anything consumes this port.
    ///
    /// Blocks may skip computing output nobody reads.
    #[must_use]
    pub fn is_connected(&self, port: usize) -> bool {
        self.connected.get(port).copied().unwrap_or(false)
    }

    /// Write samples to a port.
    pub fn write<T: StreamItem>(&mut self, port: usize, data: Vec<T>) -> Result<()> {
        let Some(p) = self.ports.get_mut(port) else {
            return Err(Error::msg(format!("write to nonexisting output port {port}")));
        };
        p.append(T::wrap(data))
    }

    /// Write a copy of a slice to a port.
    pub fn write_slice<T: StreamItem>(&mut self, port: usize, data: &[T]) -> Result<()> {
        self.write(port, data.to_vec())
    }

    /// Total number of samples written across all ports.
    #[must_use]
    pub fn produced(&self) -> usize {
        self.ports.iter().map(Samples::len).sum()
    }

    /// Take the written batches, one per port.
    #[must_use]
    pub fn into_inner(self) -> Vec<Samples> {
        self.ports
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn append_type_mismatch() -> Result<()> {
        let mut s = Samples::Float(vec![1.0]);
        s.append(Samples::Float(vec![2.0, 3.0]))?;
        assert_eq!(s.len(), 3);
        assert!(s.append(Samples::Complex(vec![Complex::default()])).is_err());
        assert_eq!(s.len(), 3);
        Ok(())
    }

    #[test]
    fn keep_newest() {
        let mut s = Samples::Float(vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(s.keep_newest(10), 0);
        assert_eq!(s.keep_newest(2), 2);
        assert_eq!(s, Samples::Float(vec![3.0, 4.0]));
    }

    #[test]
    fn input_streams() {
        let i = InputStreams::new(vec![Some(Samples::Float(vec![1.0, 2.0])), None]);
        assert_eq!(i.get::<Float>(0), &[1.0, 2.0]);
        assert!(i.get::<Complex>(0).is_empty());
        assert!(i.get::<Float>(1).is_empty());
        assert!(i.get::<Float>(7).is_empty());
        assert!(i.is_connected(0));
        assert!(!i.is_connected(1));
        assert_eq!(i.available(), 2);
    }

    #[test]
    fn output_streams() -> Result<()> {
        let mut o = OutputStreams::new(&[ItemType::Complex, ItemType::Float], vec![true, false]);
        o.write(0, vec![Complex::new(1.0, 0.0)])?;
        o.write_slice(1, &[1.0 as Float, 2.0])?;
        assert!(o.write(0, vec![1.0 as Float]).is_err());
        assert!(o.write(2, vec![1.0 as Float]).is_err());
        assert!(o.is_connected(0));
        assert!(!o.is_connected(1));
        assert_eq!(o.produced(), 3);
        let v = o.into_inner();
        assert_eq!(v[1], Samples::Float(vec![1.0, 2.0]));
        Ok(())
    }
}
