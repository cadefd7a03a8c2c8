//! Iterators backing `foreach`.
//!
//! An iterator exposes `get_key`, `get_value` and `at_end`; the cursor
//! advances when the value is fetched (the key alone does not move it,
//! except for files where the key is the running line number). Taking the
//! value by reference is only meaningful for List and Table, whose storage
//! can hand out an alias cell; the other kinds refuse with a
//! ReferenceError.
//!
//! Iterators are acyclic from the collector's point of view: they keep
//! their target alive through plain reference counting and die with the
//! loop that created them.

use std::cell::Cell;

use crate::error::{reference_error, runtime_error, Result};
use crate::file::File;
use crate::list::List;
use crate::object::Handle;
use crate::regexp::Regex;
use crate::string::Str;
use crate::table::{Key, Table};
use crate::value::Value;

enum IterKind {
    List {
        target: Handle<List>,
        pos: Cell<i64>,
    },
    Table {
        target: Handle<Table>,
        /// Key snapshot taken at creation; entries removed mid-loop are
        /// skipped when the cursor reaches them.
        keys: Vec<Value>,
        pos: Cell<usize>,
    },
    Str {
        target: Str,
        pos: Cell<i64>,
    },
    File {
        target: Handle<File>,
    },
    Regex {
        target: Handle<Regex>,
        pos: Cell<i64>,
    },
}

pub struct Iter {
    kind: IterKind,
    ref_val: bool,
}

impl Iter {
    pub fn over_list(target: Handle<List>, ref_val: bool) -> Iter {
        Iter {
            kind: IterKind::List {
                target,
                pos: Cell::new(1),
            },
            ref_val,
        }
    }

    pub fn over_table(target: Handle<Table>, ref_val: bool) -> Iter {
        let keys = target.keys();
        Iter {
            kind: IterKind::Table {
                target,
                keys,
                pos: Cell::new(0),
            },
            ref_val,
        }
    }

    pub fn over_string(target: Str, ref_val: bool) -> Iter {
        Iter {
            kind: IterKind::Str {
                target,
                pos: Cell::new(1),
            },
            ref_val,
        }
    }

    pub fn over_file(target: Handle<File>, ref_val: bool) -> Result<Iter> {
        if !target.readable() {
            return Err(runtime_error(
                "Cannot iterate File object: the file is not readable",
            ));
        }
        Ok(Iter {
            kind: IterKind::File { target },
            ref_val,
        })
    }

    pub fn over_regex(target: Handle<Regex>, ref_val: bool) -> Iter {
        Iter {
            kind: IterKind::Regex {
                target,
                pos: Cell::new(1),
            },
            ref_val,
        }
    }

    /// Move a table cursor past keys whose entry has been removed since
    /// the snapshot was taken.
    fn skip_stale_table_keys(target: &Handle<Table>, keys: &[Value], pos: &Cell<usize>) {
        let mut i = pos.get();
        while i < keys.len() && !target.contains(&keys[i]) {
            i += 1;
        }
        pos.set(i);
    }

    pub fn at_end(&self) -> Result<bool> {
        match &self.kind {
            IterKind::List { target, pos } => Ok(pos.get() > target.len()),
            IterKind::Table { target, keys, pos } => {
                Self::skip_stale_table_keys(target, keys, pos);
                Ok(pos.get() >= keys.len())
            }
            IterKind::Str { target, pos } => Ok(pos.get() > target.grapheme_count()),
            IterKind::File { target } => target.at_end(),
            IterKind::Regex { target, pos } => Ok(pos.get() > target.count()),
        }
    }

    pub fn get_key(&self) -> Result<Value> {
        match &self.kind {
            IterKind::List { pos, .. } => Ok(Value::Integer(pos.get())),
            IterKind::Table { target, keys, pos } => {
                Self::skip_stale_table_keys(target, keys, pos);
                keys.get(pos.get())
                    .cloned()
                    .ok_or_else(|| runtime_error("Table iterator is exhausted"))
            }
            IterKind::Str { pos, .. } => Ok(Value::Integer(pos.get())),
            // The key of a file line is its line number; reading the line
            // advances it.
            IterKind::File { target } => Ok(Value::Integer(target.lines_read() + 1)),
            IterKind::Regex { pos, .. } => Ok(Value::Integer(pos.get())),
        }
    }

    pub fn get_value(&self) -> Result<Value> {
        match &self.kind {
            IterKind::List { target, pos } => {
                let offset = target.check_index(pos.get())?;
                pos.set(pos.get() + 1);
                let mut items = target.items_mut();
                if self.ref_val {
                    Ok(items[offset].make_alias())
                } else {
                    Ok(items[offset].resolve())
                }
            }
            IterKind::Table { target, keys, pos } => {
                Self::skip_stale_table_keys(target, keys, pos);
                let key = keys
                    .get(pos.get())
                    .cloned()
                    .ok_or_else(|| runtime_error("Table iterator is exhausted"))?;
                pos.set(pos.get() + 1);
                let mut map = target.map_mut();
                let slot = map
                    .get_mut(&Key(key.resolve()))
                    .ok_or_else(|| runtime_error("Table entry vanished during iteration"))?;
                if self.ref_val {
                    Ok(slot.make_alias())
                } else {
                    Ok(slot.resolve())
                }
            }
            IterKind::Str { target, pos } => {
                if self.ref_val {
                    return Err(reference_error(
                        "Cannot take a reference to a character in a string.\n\
                         Hint: take the second loop variable by value, not by reference",
                    ));
                }
                let g = target.next_grapheme(pos.get())?;
                pos.set(pos.get() + 1);
                Ok(Value::String(g))
            }
            IterKind::File { target } => {
                if self.ref_val {
                    return Err(reference_error(
                        "Cannot take a reference to a line in a file.\n\
                         Hint: take the second loop variable by value, not by reference",
                    ));
                }
                Ok(Value::String(target.read_line()?))
            }
            IterKind::Regex { target, pos } => {
                if self.ref_val {
                    return Err(reference_error(
                        "Cannot take a reference to a group in a regular expression.\n\
                         Hint: take the second loop variable by value, not by reference",
                    ));
                }
                let capture = target.capture(pos.get())?;
                pos.set(pos.get() + 1);
                Ok(Value::String(capture))
            }
        }
    }
}
