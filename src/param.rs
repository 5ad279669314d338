use static_assertions::const_assert;

/// number of sleep queue chains
pub const NCHAIN: usize = 128;

/// maximum number of threads, each owning one sleep queue node
pub const NTHREAD: usize = 64;

/// number of block lists per sleep queue
pub const NR_SLEEPQS: usize = 2;

/// low bits of a wait channel folded into the chain hash
pub const SC_SHIFT: u32 = 8;

pub(crate) const SC_MASK: usize = NCHAIN - 1;

const_assert!(NCHAIN.is_power_of_two());
const_assert!(NR_SLEEPQS >= 2);
const_assert!(NTHREAD > 0);
