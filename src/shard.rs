/*!
 * Command Execution
 *
 * A shard owns the keyspace and turns decoded requests into encoded
 * replies. The reactor owns exactly one shard and hands it to each
 * connection while that connection's requests are dispatched, so tests
 * can run any number of independent shards side by side.
 */

use crate::error::{CommandError, ERR_TYPE};
use crate::protocol::{begin_arr, end_arr, write_arr, write_dbl, write_err, write_int, write_nil, write_str, Cmd};
use crate::storage::{Dict, Value};
use bytes::{Bytes, BytesMut};
use log::trace;

/// A single execution unit: one keyspace, one thread.
#[derive(Default)]
pub struct Shard {
    /// Identifier used in log lines
    pub id: usize,
    /// In-memory storage dictionary
    pub dict: Dict,
}

impl Shard {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            dict: Dict::new(),
        }
    }

    /// Decode a raw argument list and execute it, appending the reply
    /// body to `out`. Command-level failures become `Error` replies.
    pub fn dispatch(&mut self, args: &[Bytes], out: &mut BytesMut) {
        match Cmd::from_args(args) {
            Ok(cmd) => self.exec(cmd, out),
            Err(e) => {
                trace!("shard {}: rejected {:?}: {}", self.id, args.first(), e);
                write_err(e.code(), &e.to_string(), out);
            }
        }
    }

    /// Execute a command and append its reply body to `out`.
    pub fn exec(&mut self, cmd: Cmd, out: &mut BytesMut) {
        match cmd {
            Cmd::Keys => {
                write_arr(self.dict.len(), out);
                for k in self.dict.keys() {
                    write_str(k, out);
                }
            }

            Cmd::Get(k) => match self.dict.get(&k) {
                Some(Value::Str(v)) => write_str(v, out),
                Some(Value::ZSet(_)) => write_err(ERR_TYPE, "expect string", out),
                None => write_nil(out),
            },

            Cmd::Set(k, v) => {
                self.dict.set(k, v);
                write_nil(out);
            }

            Cmd::Del(k) => write_int(self.dict.del(&k) as i64, out),

            Cmd::ZAdd { key, score, name } => match self.dict.zset_or_create(&key) {
                Some(z) => write_int(z.add(name, score) as i64, out),
                None => wrong_type(out),
            },

            Cmd::ZRem { key, name } => match self.dict.get_mut(&key) {
                Some(Value::ZSet(z)) => write_int(z.remove(&name) as i64, out),
                Some(Value::Str(_)) => wrong_type(out),
                None => write_int(0, out),
            },

            Cmd::ZScore { key, name } => match self.dict.get_mut(&key) {
                Some(Value::ZSet(z)) => match z.score(&name) {
                    Some(s) => write_dbl(s, out),
                    None => write_nil(out),
                },
                Some(Value::Str(_)) => wrong_type(out),
                None => write_nil(out),
            },

            Cmd::ZRank { key, name } => match self.dict.get_mut(&key) {
                Some(Value::ZSet(z)) => match z.rank(&name) {
                    Some(r) => write_int(r as i64, out),
                    None => write_nil(out),
                },
                Some(Value::Str(_)) => wrong_type(out),
                None => write_nil(out),
            },

            Cmd::ZCard(key) => match self.dict.get(&key) {
                Some(Value::ZSet(z)) => write_int(z.len() as i64, out),
                Some(Value::Str(_)) => wrong_type(out),
                None => write_int(0, out),
            },

            Cmd::ZQuery {
                key,
                score,
                name,
                offset,
                limit,
            } => match self.dict.get(&key) {
                Some(Value::ZSet(z)) => {
                    let at = begin_arr(out);
                    let mut n = 0;
                    for m in z.query(score, &name, offset, limit) {
                        write_str(&m.name, out);
                        write_dbl(m.score, out);
                        n += 2;
                    }
                    end_arr(out, at, n);
                }
                Some(Value::Str(_)) => wrong_type(out),
                None => write_arr(0, out),
            },
        }
    }
}

fn wrong_type(out: &mut BytesMut) {
    let e = CommandError::WrongType("expect zset");
    write_err(e.code(), &e.to_string(), out);
}
