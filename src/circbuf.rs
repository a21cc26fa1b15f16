//! Fixed-unit-size ring buffer with geometric growth, bounded at 16 MiB
//! (§3, §4.3). Each channel owns exactly one of these, sized by its port's
//! `unit_sz`; push/shift always move exactly one unit.

/// `push` refused to grow the buffer past the cap.
#[derive(Debug, Eq, PartialEq)]
pub struct CircBufFull;

pub struct CircBuf {
    /// Capacity, in units (always a power of two).
    alloc: usize,
    unit_sz: usize,
    /// Index, in units, of the oldest unread unit.
    next: usize,
    /// Number of unread units currently stored.
    unread: usize,
    data: Vec<u8>,
}

impl CircBuf {
    const INIT_UNITS: usize = 8;
    const MAX_BYTES: usize = 16 * 1024 * 1024;

    pub fn new(unit_sz: usize) -> CircBuf {
        let alloc = Self::INIT_UNITS;
        CircBuf {
            alloc,
            unit_sz,
            next: 0,
            unread: 0,
            data: vec![0u8; alloc * unit_sz.max(1)],
        }
    }

    pub fn unit_sz(&self) -> usize {
        self.unit_sz
    }

    pub fn unread(&self) -> usize {
        self.unread
    }

    pub fn is_empty(&self) -> bool {
        self.unread == 0
    }

    fn slot(&self, logical_idx: usize) -> usize {
        (self.next + logical_idx) % self.alloc
    }

    fn grow(&mut self) -> Result<(), CircBufFull> {
        let new_alloc = self.alloc * 2;
        if new_alloc * self.unit_sz.max(1) > Self::MAX_BYTES {
            return Err(CircBufFull);
        }
        let mut new_data = vec![0u8; new_alloc * self.unit_sz.max(1)];
        // Linearize the existing FIFO order into the front of the new buffer.
        for i in 0..self.unread {
            let src = self.slot(i) * self.unit_sz;
            let dst = i * self.unit_sz;
            new_data[dst..dst + self.unit_sz]
                .copy_from_slice(&self.data[src..src + self.unit_sz]);
        }
        self.data = new_data;
        self.alloc = new_alloc;
        self.next = 0;
        Ok(())
    }

    fn maybe_shrink(&mut self) {
        if self.alloc <= Self::INIT_UNITS {
            return;
        }
        if self.unread * 8 >= self.alloc {
            return;
        }
        let new_alloc = (self.alloc / 2).max(Self::INIT_UNITS);
        let mut new_data = vec![0u8; new_alloc * self.unit_sz.max(1)];
        for i in 0..self.unread {
            let src = self.slot(i) * self.unit_sz;
            let dst = i * self.unit_sz;
            new_data[dst..dst + self.unit_sz]
                .copy_from_slice(&self.data[src..src + self.unit_sz]);
        }
        self.data = new_data;
        self.alloc = new_alloc;
        self.next = 0;
    }

    /// Copies one unit from `src` into the buffer, growing first if full.
    pub fn push(&mut self, src: &[u8]) -> Result<(), CircBufFull> {
        debug_assert_eq!(src.len(), self.unit_sz);
        if self.unread == self.alloc {
            self.grow()?;
        }
        let dst_slot = self.slot(self.unread) * self.unit_sz;
        self.data[dst_slot..dst_slot + self.unit_sz].copy_from_slice(src);
        self.unread += 1;
        Ok(())
    }

    /// Copies the oldest unit into `dst`. Requires `unread > 0`.
    pub fn shift(&mut self, dst: &mut [u8]) {
        assert!(self.unread > 0, "shift on empty circular buffer");
        debug_assert_eq!(dst.len(), self.unit_sz);
        let src_slot = self.next * self.unit_sz;
        dst.copy_from_slice(&self.data[src_slot..src_slot + self.unit_sz]);
        self.next = (self.next + 1) % self.alloc;
        self.unread -= 1;
        self.maybe_shrink();
    }

    /// Drains all remaining units into a contiguous destination, FIFO order.
    pub fn transfer(&mut self, dst: &mut [u8]) {
        debug_assert_eq!(dst.len(), self.unread * self.unit_sz);
        let n = self.unread;
        for i in 0..n {
            let src_slot = self.slot(i) * self.unit_sz;
            let d = i * self.unit_sz;
            dst[d..d + self.unit_sz]
                .copy_from_slice(&self.data[src_slot..src_slot + self.unit_sz]);
        }
        self.next = 0;
        self.unread = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_round_trip() {
        let mut buf = CircBuf::new(4);
        for i in 0u32..1000 {
            buf.push(&i.to_le_bytes()).unwrap();
        }
        for i in 0u32..1000 {
            let mut out = [0u8; 4];
            buf.shift(&mut out);
            assert_eq!(u32::from_le_bytes(out), i);
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn grows_as_power_of_two_and_caps() {
        let mut buf = CircBuf::new(1);
        // Drive it well past the initial 8 units; should never exceed the cap.
        for i in 0..10_000u32 {
            buf.push(&[i as u8]).unwrap();
        }
        assert!(buf.unread() * buf.unit_sz() <= CircBuf::MAX_BYTES);
    }

    #[test]
    fn rejects_growth_past_cap() {
        let unit_sz = 1024;
        let mut buf = CircBuf::new(unit_sz);
        let unit = vec![0u8; unit_sz];
        let max_units = CircBuf::MAX_BYTES / unit_sz;
        let mut err = None;
        for _ in 0..(max_units * 2) {
            if let Err(e) = buf.push(&unit) {
                err = Some(e);
                break;
            }
        }
        assert_eq!(err, Some(CircBufFull));
    }

    #[test]
    fn transfer_drains_in_order() {
        let mut buf = CircBuf::new(1);
        for i in 0..20u8 {
            buf.push(&[i]).unwrap();
        }
        let mut out = vec![0u8; 20];
        buf.transfer(&mut out);
        assert_eq!(out, (0..20).collect::<Vec<u8>>());
        assert!(buf.is_empty());
    }
}
