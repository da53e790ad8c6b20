//! Runtime storage behind array handles.
//!
//! Handle 0 is the empty array. Every other handle indexes a buffer owned by
//! one instance; `write` mutates it in place. Named buffers get one handle
//! per instance, so every node bound to a name sees the same memory.

/// Buffers addressed by the 32-bit handles stored in array cells.
#[derive(Debug, Clone)]
pub struct ArrayTable {
    buffers: Vec<Box<[f32]>>,
    names: Vec<Option<String>>,
}

impl Default for ArrayTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ArrayTable {
    /// Creates a table holding only the empty array.
    pub fn new() -> Self {
        Self {
            buffers: vec![Box::default()],
            names: vec![None],
        }
    }

    /// Adds an anonymous copy of `samples` and returns its handle.
    pub fn push(&mut self, samples: &[f32]) -> u32 {
        self.buffers.push(samples.into());
        self.names.push(None);
        (self.buffers.len() - 1) as u32
    }

    /// Handle of the buffer called `name`, copying `samples` in on first use.
    pub fn push_named(&mut self, name: &str, samples: &[f32]) -> u32 {
        if let Some(handle) = self.handle(name) {
            return handle;
        }
        let handle = self.push(samples);
        self.names[handle as usize] = Some(name.to_owned());
        handle
    }

    /// Handle of the buffer called `name`.
    pub fn handle(&self, name: &str) -> Option<u32> {
        self.names
            .iter()
            .position(|n| n.as_deref() == Some(name))
            .map(|i| i as u32)
    }

    /// Copies the contents of every named buffer `old` also holds with the
    /// same length. Does not allocate.
    pub fn copy_named_from(&mut self, old: &ArrayTable) {
        for (buf, name) in self.buffers.iter_mut().zip(&self.names) {
            let Some(name) = name else { continue };
            if let Some(prev) = old.handle(name).map(|h| old.get(h))
                && prev.len() == buf.len()
            {
                buf.copy_from_slice(prev);
            }
        }
    }

    /// Number of handles, including the empty array.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Always false: handle 0 exists.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Contents of a handle. Unknown handles read as empty.
    pub fn get(&self, handle: u32) -> &[f32] {
        self.buffers.get(handle as usize).map_or(&[], |b| b)
    }

    /// `array[index]`, or 0 when out of range.
    #[inline]
    pub fn read(&self, handle: u32, index: f32) -> f32 {
        let buf = self.get(handle);
        element(index, buf.len()).map_or(0.0, |i| buf[i])
    }

    /// `array[index] = value`, ignored when out of range.
    #[inline]
    pub fn write(&mut self, handle: u32, index: f32, value: f32) {
        if let Some(buf) = self.buffers.get_mut(handle as usize)
            && let Some(i) = element(index, buf.len())
        {
            buf[i] = value;
        }
    }

    /// Length of a handle's buffer as a float.
    #[inline]
    pub fn length(&self, handle: u32) -> f32 {
        self.get(handle).len() as f32
    }
}

/// Element addressed by a float index. Fractions truncate toward zero;
/// negative and NaN indices are out of range.
#[inline]
fn element(index: f32, len: usize) -> Option<usize> {
    if index.is_nan() || index < 0.0 {
        return None;
    }
    let i = index as usize;
    (i < len).then_some(i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_zero_is_empty() {
        let table = ArrayTable::new();
        assert_eq!(table.length(0), 0.0);
        assert_eq!(table.read(0, 0.0), 0.0);
        assert_eq!(table.read(42, 0.0), 0.0);
    }

    #[test]
    fn out_of_range_access_is_silent() {
        let mut table = ArrayTable::new();
        let h = table.push(&[1.0, 2.0, 3.0]);
        assert_eq!(table.read(h, 1.7), 2.0);
        assert_eq!(table.read(h, 3.0), 0.0);
        assert_eq!(table.read(h, -0.5), 0.0);
        assert_eq!(table.read(h, f32::NAN), 0.0);

        table.write(h, 5.0, 9.0);
        table.write(h, f32::NAN, 9.0);
        table.write(h, 2.0, 9.0);
        assert_eq!(table.get(h), &[1.0, 2.0, 9.0]);
    }

    #[test]
    fn named_buffers_share_one_handle() {
        let mut table = ArrayTable::new();
        let a = table.push_named("shared", &[0.0, 0.0]);
        let b = table.push_named("shared", &[7.0, 7.0]);
        let c = table.push_named("other", &[0.0]);
        assert_eq!(a, b);
        assert_ne!(a, c);

        table.write(a, 1.0, 0.5);
        assert_eq!(table.read(b, 1.0), 0.5);
    }

    #[test]
    fn named_contents_carry_over() {
        let mut old = ArrayTable::new();
        let h = old.push_named("shared", &[0.0, 0.0]);
        old.write(h, 0.0, 3.0);
        old.push_named("resized", &[1.0]);

        let mut new = ArrayTable::new();
        let h = new.push_named("shared", &[0.0, 0.0]);
        let r = new.push_named("resized", &[2.0, 2.0]);
        new.copy_named_from(&old);
        assert_eq!(new.get(h), &[3.0, 0.0]);
        assert_eq!(new.get(r), &[2.0, 2.0]);
    }
}
