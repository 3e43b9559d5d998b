/*
 * Refuse
 * Copyright (C) 2020 Andrew Moffat
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <http://www.gnu.org/licenses/>.
 */

use std::cell::RefCell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Per-call logging of every dispatched operation
pub const FUSEOP_TAG: &str = "fuse_op";
/// Session setup and teardown
pub const FUSE_TAG: &str = "fuse";
/// Handler faults
pub const FUSEFS_TAG: &str = "fuse_fs";
/// Structure marshalling
pub const ABI_TAG: &str = "fuse_abi";
/// Finding and binding libfuse
pub use refuse_sys::LIB_TAG;

pub static REQ_COUNTER: AtomicUsize = AtomicUsize::new(0);
thread_local!(pub static REQUEST_ID: RefCell<usize> = RefCell::new(0));

/// Tags the current thread with a fresh request id, so every log line emitted
/// while servicing one native callback can be correlated.
pub fn next_request() -> usize {
    let req_id = REQ_COUNTER.fetch_add(1, Ordering::SeqCst);
    REQUEST_ID.with(|f| {
        *f.borrow_mut() = req_id;
    });
    req_id
}

pub fn current_request() -> usize {
    REQUEST_ID.with(|f| *f.borrow())
}

pub fn setup_logger(
    level: log::LevelFilter,
    outputs: Vec<fern::Output>,
) -> Result<(), fern::InitError> {
    let mut logger = fern::Dispatch::new()
        .format(move |out, message, record| {
            REQUEST_ID.with(|req_id| {
                out.finish(format_args!(
                    "{}[Thread: {:?}][Request: {}][{}][{}] {}",
                    chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S][%s%.3f]"),
                    std::thread::current().id(),
                    *req_id.borrow(),
                    record.target(),
                    record.level(),
                    message
                ))
            });
        })
        .level(level);

    for output in outputs {
        logger = logger.chain(output);
    }

    logger.apply()?;

    Ok(())
}
