// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Path algebra over the graph: lexical collapsing of `.`/`..`/`//` runs,
//! and the three operations that walk actual nodes (`absolute_path`,
//! `relative_path`, `traverse`).

use alloc::string::String;
use alloc::vec::Vec;

use crate::node::NodeHandle;
use crate::Error;

/// Lexically collapses `.`, `..`, and repeated `/` out of a slash-separated
/// path, without touching the filesystem/graph.
///
/// A leading `..` in a relative path (one that can't be popped against
/// anything already collected) is preserved rather than discarded, since
/// there's nothing for it to cancel. A trailing `/` is emitted whenever the
/// path's last resolved token was `.`, `..`, or a bare separator — i.e.
/// whenever the path conceptually ends "at a directory" rather than on a
/// named entry.
#[must_use]
pub fn collapse(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut stack: Vec<&str> = Vec::new();
    let mut leading_dotdots: usize = 0;
    let mut trailing = false;

    for seg in path.split('/') {
        match seg {
            "" | "." => trailing = true,
            ".." => {
                if stack.pop().is_some() {
                    trailing = true;
                } else if !absolute {
                    leading_dotdots += 1;
                    trailing = true;
                } else {
                    // At the root, `..` is a no-op: nowhere further up to go.
                    trailing = true;
                }
            }
            name => {
                stack.push(name);
                trailing = false;
            }
        }
    }

    if stack.is_empty() && leading_dotdots == 0 {
        return if absolute {
            String::from("/")
        } else {
            String::new()
        };
    }

    let mut out = String::new();
    if absolute {
        out.push('/');
    }
    for _ in 0..leading_dotdots {
        out.push_str("../");
    }
    for (i, name) in stack.iter().enumerate() {
        if i > 0 {
            out.push('/');
        }
        out.push_str(name);
    }
    if trailing {
        out.push('/');
    }
    out
}

/// Builds the absolute path from the root (or from `to`, if given) down to
/// `from`, by walking `parent` links upward and collecting names.
///
/// Each node visited is pinned (ref-count incremented) for the duration of
/// the walk and released again before returning, so a concurrent `remove`
/// can't free a node this function still needs to read. `to` acts as an
/// early-stop sentinel; `None` walks all the way to the actual root.
///
/// This implementation's `Vec`/`String` growth is infallible (it aborts
/// rather than returning `Err` on allocation failure, matching the rest of
/// this crate's choice to use `alloc`'s ordinary fallible-free collections
/// for small, bounded strings); the `Result` return type is kept for
/// symmetry with [`traverse`] and to leave room for a fallible allocator in
/// the future.
pub fn absolute_path<T>(from: NodeHandle<T>, to: Option<NodeHandle<T>>) -> Result<String, Error> {
    let stop = to;
    let mut chain: Vec<NodeHandle<T>> = Vec::new();

    let mut current = from;
    current.pin();
    loop {
        if Some(current) == stop {
            current.unpin();
            break;
        }
        chain.push(current);
        match current.parent() {
            Some(parent) => {
                parent.pin();
                current = parent;
            }
            None => break,
        }
    }

    let mut out = String::from("/");
    let mut first = true;
    for node in chain.iter().rev() {
        // The root itself (name `""`) is pushed onto `chain` like any other
        // ancestor; skip it here so it contributes the leading `/` already
        // in `out` and nothing else, instead of a second, doubled one.
        if node.name().is_empty() {
            continue;
        }
        if !first {
            out.push('/');
        }
        out.push_str(node.name());
        first = false;
    }

    for node in &chain {
        node.unpin();
    }

    Ok(out)
}

/// Renders both `from` and `to` as absolute paths, finds their deepest
/// common prefix (ending on a `/`), and emits one `../` per remaining
/// component of `from` followed by the remaining tail of `to`.
pub fn relative_path<T>(from: NodeHandle<T>, to: NodeHandle<T>) -> Result<String, Error> {
    let abs_from = absolute_path(from, None)?;
    let abs_to = absolute_path(to, None)?;

    let from_bytes = abs_from.as_bytes();
    let to_bytes = abs_to.as_bytes();
    let mut common_end = 0;
    let mut i = 0;
    while i < from_bytes.len() && i < to_bytes.len() && from_bytes[i] == to_bytes[i] {
        if from_bytes[i] == b'/' {
            common_end = i + 1;
        }
        i += 1;
    }

    let from_tail = &abs_from[common_end..];
    let to_tail = &abs_to[common_end..];
    let up_count = from_tail.split('/').filter(|s| !s.is_empty()).count();

    let mut out = String::new();
    for _ in 0..up_count {
        out.push_str("../");
    }
    out.push_str(to_tail);
    Ok(out)
}

/// Callback invoked by [`traverse`] when a path segment has no matching
/// child: given the current node and the missing segment's name, it may
/// materialize and return a new node for `traverse` to attach and hop into.
pub type OnMissCallback<'a, T> = dyn Fn(NodeHandle<T>, &str) -> Option<NodeHandle<T>> + 'a;

/// Walks `path` segment by segment starting at `start`, hopping into each
/// named child (or up via `..`, or materializing a missing child through
/// `on_miss` if one is supplied). Returns the final node, still holding the
/// one reference this function pinned on it.
///
/// Segments that are empty or `.` are no-ops. A removed-sibling cycle
/// sentinel encountered mid-lookup is handled by delegating child lookup to
/// [`NodeHandle::find`], which already restarts its walk when it detects
/// one.
pub fn traverse<T>(
    start: NodeHandle<T>,
    path: &str,
    on_miss: Option<&OnMissCallback<'_, T>>,
) -> Result<NodeHandle<T>, Error> {
    let mut current = start;
    current.pin();

    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if let Some(parent) = current.parent() {
                    parent.pin();
                    current.unpin();
                    current = parent;
                }
                // At the root, ".." is a no-op.
            }
            name => {
                let child = match current.find(name) {
                    Some(found) => found,
                    None => {
                        let Some(cb) = on_miss else {
                            current.unpin();
                            return Err(Error::NotFound);
                        };
                        let Some(created) = cb(current, name) else {
                            current.unpin();
                            return Err(Error::NotFound);
                        };
                        if let Err(e) = current.add(created, Some(name)) {
                            current.unpin();
                            return Err(e);
                        }
                        created.pin();
                        created
                    }
                };
                current.unpin();
                current = child;
            }
        }
    }

    Ok(current)
}
