//! RingChannel - lock-free SPSC byte ring over shared memory
//!
//! One producer appends bytes and one consumer reads them back in order,
//! through a fixed-size block both sides map. The block is either a heap
//! allocation (two threads) or a named POSIX shared memory object (two
//! processes).
//!
//! # Architecture
//!
//! - **Producer**: owns the block, appends (all-or-nothing or partial fill), sets EOF
//! - **Consumer**: attaches by handle, reads non-blocking or parks on a futex until data or EOF
//!
//! ```no_run
//! use ring_channel::channel;
//!
//! let (mut producer, mut consumer) = channel(1024)?;
//! let reader = std::thread::spawn(move || {
//!     let mut bytes = Vec::new();
//!     while let Some(byte) = consumer.blocking_read() {
//!         bytes.push(byte);
//!     }
//!     bytes
//! });
//!
//! producer.append(b"hello")?;
//! producer.set_eof();
//! assert_eq!(reader.join().unwrap(), b"hello");
//! # Ok::<(), ring_channel::RingError>(())
//! ```

pub mod block;
pub mod channel;
pub mod error;
pub mod layout;
pub mod shm;
pub mod trace;

mod futex;

pub use block::SharedBlock;
pub use channel::{channel, Consumer, Drain, Producer, RingChannel, RingConfig};
pub use error::{ErrorKind, Result, RingError};
