//! I/O image tables.
//!
//! Each table is a fixed-capacity array of pointers into control-program
//! memory: the program allocates the storage and publishes the addresses of
//! the cells it uses through `glue_vars`; plugins observe and mutate through
//! the same indirection. Slots the program leaves unbound are pointed at
//! process-local scratch cells before plugins run, so a concurrent access
//! can never fault. All raw-pointer dereferences happen under the shared
//! priority-inheriting mutex wrapping this value.

#![allow(missing_docs)]

use ladder_plugin_api::{
    IecBool, IecByte, IecUdint, IecUint, IecUlint, BITS_PER_CELL, BUFFER_SIZE,
};
use tracing::info;

macro_rules! scalar_accessors {
    ($read:ident, $write:ident, $table:ident, $ty:ty) => {
        /// Read the cell behind a slot; `None` when out of range or unbound.
        #[must_use]
        pub fn $read(&self, index: usize) -> Option<$ty> {
            let slot = *self.$table.get(index)?;
            if slot.is_null() {
                None
            } else {
                Some(unsafe { slot.read_volatile() })
            }
        }

        /// Write the cell behind a slot; `false` when out of range or
        /// unbound.
        pub fn $write(&mut self, index: usize, value: $ty) -> bool {
            match self.$table.get(index) {
                Some(&slot) if !slot.is_null() => {
                    unsafe { slot.write_volatile(value) };
                    true
                }
                _ => false,
            }
        }
    };
}

/// The thirteen image tables plus the scratch cells backing unbound slots.
pub struct ImageTables {
    bool_in: Box<[[*mut IecBool; BITS_PER_CELL]]>,
    bool_out: Box<[[*mut IecBool; BITS_PER_CELL]]>,
    byte_in: Box<[*mut IecByte]>,
    byte_out: Box<[*mut IecByte]>,
    int_in: Box<[*mut IecUint]>,
    int_out: Box<[*mut IecUint]>,
    dint_in: Box<[*mut IecUdint]>,
    dint_out: Box<[*mut IecUdint]>,
    lint_in: Box<[*mut IecUlint]>,
    lint_out: Box<[*mut IecUlint]>,
    int_mem: Box<[*mut IecUint]>,
    dint_mem: Box<[*mut IecUdint]>,
    lint_mem: Box<[*mut IecUlint]>,
    scratch: Scratch,
}

// The tables hold raw pointers into program memory; access is serialized by
// the PiMutex wrapping this value, and every pointer either targets the
// loaded program (kept alive by the lifecycle manager) or the scratch cells
// owned below.
unsafe impl Send for ImageTables {}

/// Process-local zero cells installed into unbound slots.
struct Scratch {
    bool_in: Box<[[IecBool; BITS_PER_CELL]]>,
    bool_out: Box<[[IecBool; BITS_PER_CELL]]>,
    byte_in: Box<[IecByte]>,
    byte_out: Box<[IecByte]>,
    int_in: Box<[IecUint]>,
    int_out: Box<[IecUint]>,
    dint_in: Box<[IecUdint]>,
    dint_out: Box<[IecUdint]>,
    lint_in: Box<[IecUlint]>,
    lint_out: Box<[IecUlint]>,
    int_mem: Box<[IecUint]>,
    dint_mem: Box<[IecUdint]>,
    lint_mem: Box<[IecUlint]>,
}

impl Scratch {
    fn new() -> Self {
        Self {
            bool_in: vec![[0; BITS_PER_CELL]; BUFFER_SIZE].into_boxed_slice(),
            bool_out: vec![[0; BITS_PER_CELL]; BUFFER_SIZE].into_boxed_slice(),
            byte_in: vec![0; BUFFER_SIZE].into_boxed_slice(),
            byte_out: vec![0; BUFFER_SIZE].into_boxed_slice(),
            int_in: vec![0; BUFFER_SIZE].into_boxed_slice(),
            int_out: vec![0; BUFFER_SIZE].into_boxed_slice(),
            dint_in: vec![0; BUFFER_SIZE].into_boxed_slice(),
            dint_out: vec![0; BUFFER_SIZE].into_boxed_slice(),
            lint_in: vec![0; BUFFER_SIZE].into_boxed_slice(),
            lint_out: vec![0; BUFFER_SIZE].into_boxed_slice(),
            int_mem: vec![0; BUFFER_SIZE].into_boxed_slice(),
            dint_mem: vec![0; BUFFER_SIZE].into_boxed_slice(),
            lint_mem: vec![0; BUFFER_SIZE].into_boxed_slice(),
        }
    }
}

/// Base addresses of every table, in `set_buffer_pointers` argument order.
#[derive(Debug, Clone, Copy)]
pub struct TableBases {
    pub bool_in: *mut [*mut IecBool; BITS_PER_CELL],
    pub bool_out: *mut [*mut IecBool; BITS_PER_CELL],
    pub byte_in: *mut *mut IecByte,
    pub byte_out: *mut *mut IecByte,
    pub int_in: *mut *mut IecUint,
    pub int_out: *mut *mut IecUint,
    pub dint_in: *mut *mut IecUdint,
    pub dint_out: *mut *mut IecUdint,
    pub lint_in: *mut *mut IecUlint,
    pub lint_out: *mut *mut IecUlint,
    pub int_mem: *mut *mut IecUint,
    pub dint_mem: *mut *mut IecUdint,
    pub lint_mem: *mut *mut IecUlint,
}

impl ImageTables {
    /// Create tables with every slot unbound.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bool_in: vec![[std::ptr::null_mut(); BITS_PER_CELL]; BUFFER_SIZE].into_boxed_slice(),
            bool_out: vec![[std::ptr::null_mut(); BITS_PER_CELL]; BUFFER_SIZE].into_boxed_slice(),
            byte_in: vec![std::ptr::null_mut(); BUFFER_SIZE].into_boxed_slice(),
            byte_out: vec![std::ptr::null_mut(); BUFFER_SIZE].into_boxed_slice(),
            int_in: vec![std::ptr::null_mut(); BUFFER_SIZE].into_boxed_slice(),
            int_out: vec![std::ptr::null_mut(); BUFFER_SIZE].into_boxed_slice(),
            dint_in: vec![std::ptr::null_mut(); BUFFER_SIZE].into_boxed_slice(),
            dint_out: vec![std::ptr::null_mut(); BUFFER_SIZE].into_boxed_slice(),
            lint_in: vec![std::ptr::null_mut(); BUFFER_SIZE].into_boxed_slice(),
            lint_out: vec![std::ptr::null_mut(); BUFFER_SIZE].into_boxed_slice(),
            int_mem: vec![std::ptr::null_mut(); BUFFER_SIZE].into_boxed_slice(),
            dint_mem: vec![std::ptr::null_mut(); BUFFER_SIZE].into_boxed_slice(),
            lint_mem: vec![std::ptr::null_mut(); BUFFER_SIZE].into_boxed_slice(),
            scratch: Scratch::new(),
        }
    }

    /// Point every unbound slot at a zeroed scratch cell. Idempotent;
    /// returns the number of slots filled.
    pub fn fill_null_with_scratch(&mut self) -> usize {
        let mut filled = 0;

        for (row, cells) in self.bool_in.iter_mut().zip(self.scratch.bool_in.iter_mut()) {
            for (slot, cell) in row.iter_mut().zip(cells.iter_mut()) {
                if slot.is_null() {
                    *cell = 0;
                    *slot = cell;
                    filled += 1;
                }
            }
        }
        for (row, cells) in self
            .bool_out
            .iter_mut()
            .zip(self.scratch.bool_out.iter_mut())
        {
            for (slot, cell) in row.iter_mut().zip(cells.iter_mut()) {
                if slot.is_null() {
                    *cell = 0;
                    *slot = cell;
                    filled += 1;
                }
            }
        }

        filled += fill_scalar(&mut self.byte_in, &mut self.scratch.byte_in);
        filled += fill_scalar(&mut self.byte_out, &mut self.scratch.byte_out);
        filled += fill_scalar(&mut self.int_in, &mut self.scratch.int_in);
        filled += fill_scalar(&mut self.int_out, &mut self.scratch.int_out);
        filled += fill_scalar(&mut self.dint_in, &mut self.scratch.dint_in);
        filled += fill_scalar(&mut self.dint_out, &mut self.scratch.dint_out);
        filled += fill_scalar(&mut self.lint_in, &mut self.scratch.lint_in);
        filled += fill_scalar(&mut self.lint_out, &mut self.scratch.lint_out);
        filled += fill_scalar(&mut self.int_mem, &mut self.scratch.int_mem);
        filled += fill_scalar(&mut self.dint_mem, &mut self.scratch.dint_mem);
        filled += fill_scalar(&mut self.lint_mem, &mut self.scratch.lint_mem);

        info!("filled {filled} unbound image table slots with scratch cells");
        filled
    }

    /// Reset every slot to unbound. Called after a program unloads, before
    /// the next load binds fresh addresses.
    pub fn clear(&mut self) {
        for row in self.bool_in.iter_mut().chain(self.bool_out.iter_mut()) {
            row.fill(std::ptr::null_mut());
        }
        self.byte_in.fill(std::ptr::null_mut());
        self.byte_out.fill(std::ptr::null_mut());
        self.int_in.fill(std::ptr::null_mut());
        self.int_out.fill(std::ptr::null_mut());
        self.dint_in.fill(std::ptr::null_mut());
        self.dint_out.fill(std::ptr::null_mut());
        self.lint_in.fill(std::ptr::null_mut());
        self.lint_out.fill(std::ptr::null_mut());
        self.int_mem.fill(std::ptr::null_mut());
        self.dint_mem.fill(std::ptr::null_mut());
        self.lint_mem.fill(std::ptr::null_mut());
        info!("cleared all image table slots");
    }

    /// Base addresses in `set_buffer_pointers` order. The addresses stay
    /// valid for the lifetime of this value (the tables are boxed and the
    /// value itself lives inside the shared mutex).
    #[must_use]
    pub fn bases(&self) -> TableBases {
        TableBases {
            bool_in: self.bool_in.as_ptr().cast_mut(),
            bool_out: self.bool_out.as_ptr().cast_mut(),
            byte_in: self.byte_in.as_ptr().cast_mut(),
            byte_out: self.byte_out.as_ptr().cast_mut(),
            int_in: self.int_in.as_ptr().cast_mut(),
            int_out: self.int_out.as_ptr().cast_mut(),
            dint_in: self.dint_in.as_ptr().cast_mut(),
            dint_out: self.dint_out.as_ptr().cast_mut(),
            lint_in: self.lint_in.as_ptr().cast_mut(),
            lint_out: self.lint_out.as_ptr().cast_mut(),
            int_mem: self.int_mem.as_ptr().cast_mut(),
            dint_mem: self.dint_mem.as_ptr().cast_mut(),
            lint_mem: self.lint_mem.as_ptr().cast_mut(),
        }
    }

    /// Read one bit of the boolean input table.
    #[must_use]
    pub fn read_bool_in(&self, index: usize, bit: usize) -> Option<bool> {
        let slot = *self.bool_in.get(index)?.get(bit)?;
        if slot.is_null() {
            None
        } else {
            Some(unsafe { slot.read_volatile() } != 0)
        }
    }

    /// Write one bit of the boolean input table.
    pub fn write_bool_in(&mut self, index: usize, bit: usize, value: bool) -> bool {
        write_bool_slot(&mut self.bool_in, index, bit, value)
    }

    /// Read one bit of the boolean output table.
    #[must_use]
    pub fn read_bool_out(&self, index: usize, bit: usize) -> Option<bool> {
        let slot = *self.bool_out.get(index)?.get(bit)?;
        if slot.is_null() {
            None
        } else {
            Some(unsafe { slot.read_volatile() } != 0)
        }
    }

    /// Write one bit of the boolean output table.
    pub fn write_bool_out(&mut self, index: usize, bit: usize, value: bool) -> bool {
        write_bool_slot(&mut self.bool_out, index, bit, value)
    }

    scalar_accessors!(read_byte_in, write_byte_in, byte_in, IecByte);
    scalar_accessors!(read_byte_out, write_byte_out, byte_out, IecByte);
    scalar_accessors!(read_int_in, write_int_in, int_in, IecUint);
    scalar_accessors!(read_int_out, write_int_out, int_out, IecUint);
    scalar_accessors!(read_dint_in, write_dint_in, dint_in, IecUdint);
    scalar_accessors!(read_dint_out, write_dint_out, dint_out, IecUdint);
    scalar_accessors!(read_lint_in, write_lint_in, lint_in, IecUlint);
    scalar_accessors!(read_lint_out, write_lint_out, lint_out, IecUlint);
    scalar_accessors!(read_int_mem, write_int_mem, int_mem, IecUint);
    scalar_accessors!(read_dint_mem, write_dint_mem, dint_mem, IecUdint);
    scalar_accessors!(read_lint_mem, write_lint_mem, lint_mem, IecUlint);
}

fn fill_scalar<T: Copy + Default>(table: &mut [*mut T], cells: &mut [T]) -> usize {
    let mut filled = 0;
    for (slot, cell) in table.iter_mut().zip(cells.iter_mut()) {
        if slot.is_null() {
            *cell = T::default();
            *slot = cell;
            filled += 1;
        }
    }
    filled
}

fn write_bool_slot(
    table: &mut [[*mut IecBool; BITS_PER_CELL]],
    index: usize,
    bit: usize,
    value: bool,
) -> bool {
    match table.get(index).and_then(|row| row.get(bit)) {
        Some(&slot) if !slot.is_null() => {
            unsafe { slot.write_volatile(u8::from(value)) };
            true
        }
        _ => false,
    }
}

impl Default for ImageTables {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ImageTables {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageTables")
            .field("capacity", &BUFFER_SIZE)
            .finish_non_exhaustive()
    }
}
