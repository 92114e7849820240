//! Command Dispatcher
//!
//! Routes a parsed request to its handler. Each handler validates arity
//! and argument types, invokes the cache, and writes exactly one reply
//! into the caller's [`ReplyWriter`]. A handler that fails writes
//! nothing; the returned [`CommandError`] carries the user-visible error
//! string and the connection loop emits it as an error reply, keeping
//! the connection open.
//!
//! ## Supported Commands
//!
//! | Command | Reply |
//! |---------|-------|
//! | `FLUSHDB` | `+OK` |
//! | `EXPIRE key seconds` / `PEXPIRE key ms` | `:0` or `:1` |
//! | `SET key value` / `MSET k v [k v ...]` | `+OK` |
//! | `GET key` | bulk or null |
//! | `MGET key [key ...]` | array of bulk/null |
//! | `EXISTS key` | `:0` or `:1` |
//! | `HSET key field value` / `HMSET key f v [f v ...]` | `+OK` |
//! | `HGET key field` | bulk or null |
//! | `HMGET key field [field ...]` | array of bulk/null |
//! | `HGETALL key` | interleaved field/value array, or null array |
//! | `HEXISTS key field` | `:0` or `:1` |
//! | `DEL key [key ...]` / `HDEL key field [field ...]` | `:N` removed |
//! | `INFO` | bulk string with `#`-grouped sections |
//! | `CONFIG SET maxmemory <N>mb` | `+OK`, budget applied |
//! | `CONFIG SET maxmemory-policy <p>` | `+OK`, ignored |
//!
//! Command names are case-insensitive.

use crate::connection::ConnectionStats;
use crate::protocol::ReplyWriter;
use crate::storage::{Cache, WrongType};
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;

/// User-visible command failures. The `Display` form is sent verbatim as
/// the RESP error payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("ERR unsupported command")]
    Unsupported,

    #[error("ERR wrong number of arguments")]
    Arity,

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    #[error("{0}")]
    WrongType(#[from] WrongType),

    #[error("invalid maxmemory: {0}")]
    InvalidMaxmemory(String),
}

/// Executes commands against the shared cache.
///
/// Cheap to clone; every connection task carries its own copy.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    cache: Arc<Cache>,
    stats: Arc<ConnectionStats>,
    port: u16,
}

impl Dispatcher {
    pub fn new(cache: Arc<Cache>, stats: Arc<ConnectionStats>, port: u16) -> Self {
        Self { cache, stats, port }
    }

    /// Routes one request (`args[0]` is the command name) and writes the
    /// success reply. On error nothing has been written.
    pub fn dispatch(&self, args: &[Bytes], reply: &mut ReplyWriter) -> Result<(), CommandError> {
        let (name, args) = match args.split_first() {
            Some((name, rest)) => (name.to_ascii_lowercase(), rest),
            None => return Err(CommandError::Unsupported),
        };
        match name.as_slice() {
            b"flushdb" => self.flushdb(args, reply),
            b"expire" => self.expire(args, reply, 1000),
            b"pexpire" => self.expire(args, reply, 1),
            b"set" => self.set(args, reply),
            b"mset" => self.mset(args, reply),
            b"get" => self.get(args, reply),
            b"mget" => self.mget(args, reply),
            b"exists" => self.exists(args, reply),
            b"hset" => self.hset(args, reply),
            b"hmset" => self.hmset(args, reply),
            b"hget" => self.hget(args, reply),
            b"hmget" => self.hmget(args, reply),
            b"hgetall" => self.hgetall(args, reply),
            b"hexists" => self.hexists(args, reply),
            b"del" => self.del(args, reply),
            b"hdel" => self.hdel(args, reply),
            b"info" => self.info(args, reply),
            b"config" => self.config(args, reply),
            _ => Err(CommandError::Unsupported),
        }
    }

    fn flushdb(&self, args: &[Bytes], reply: &mut ReplyWriter) -> Result<(), CommandError> {
        if !args.is_empty() {
            return Err(CommandError::Arity);
        }
        self.cache.flush();
        reply.status("OK");
        Ok(())
    }

    /// Shared by EXPIRE (unit = 1000) and PEXPIRE (unit = 1). A
    /// non-positive ttl clears the expiration.
    fn expire(&self, args: &[Bytes], reply: &mut ReplyWriter, unit: i64) -> Result<(), CommandError> {
        if args.len() != 2 {
            return Err(CommandError::Arity);
        }
        let ttl = parse_int(&args[1])?;
        let existed = self.cache.expire(&args[0], ttl.saturating_mul(unit));
        reply.int(existed as i64);
        Ok(())
    }

    fn set(&self, args: &[Bytes], reply: &mut ReplyWriter) -> Result<(), CommandError> {
        if args.len() != 2 {
            return Err(CommandError::Arity);
        }
        self.cache.set(args[0].clone(), args[1].clone())?;
        reply.status("OK");
        Ok(())
    }

    fn mset(&self, args: &[Bytes], reply: &mut ReplyWriter) -> Result<(), CommandError> {
        if args.len() < 2 || args.len() % 2 != 0 {
            return Err(CommandError::Arity);
        }
        for pair in args.chunks_exact(2) {
            self.cache.set(pair[0].clone(), pair[1].clone())?;
        }
        reply.status("OK");
        Ok(())
    }

    fn get(&self, args: &[Bytes], reply: &mut ReplyWriter) -> Result<(), CommandError> {
        if args.len() != 1 {
            return Err(CommandError::Arity);
        }
        let value = self.cache.get(&args[0])?;
        reply.string(value.as_deref());
        Ok(())
    }

    fn mget(&self, args: &[Bytes], reply: &mut ReplyWriter) -> Result<(), CommandError> {
        if args.is_empty() {
            return Err(CommandError::Arity);
        }
        let mut values = Vec::with_capacity(args.len());
        for key in args {
            values.push(self.cache.get(key)?);
        }
        reply.string_array(&values);
        Ok(())
    }

    fn exists(&self, args: &[Bytes], reply: &mut ReplyWriter) -> Result<(), CommandError> {
        if args.len() != 1 {
            return Err(CommandError::Arity);
        }
        reply.int(self.cache.exists(&args[0]) as i64);
        Ok(())
    }

    fn hset(&self, args: &[Bytes], reply: &mut ReplyWriter) -> Result<(), CommandError> {
        if args.len() != 3 {
            return Err(CommandError::Arity);
        }
        self.cache
            .hset(args[0].clone(), args[1].clone(), args[2].clone())?;
        reply.status("OK");
        Ok(())
    }

    fn hmset(&self, args: &[Bytes], reply: &mut ReplyWriter) -> Result<(), CommandError> {
        // key plus one or more field/value pairs
        if args.len() < 3 || args.len() % 2 != 1 {
            return Err(CommandError::Arity);
        }
        for pair in args[1..].chunks_exact(2) {
            self.cache
                .hset(args[0].clone(), pair[0].clone(), pair[1].clone())?;
        }
        reply.status("OK");
        Ok(())
    }

    fn hget(&self, args: &[Bytes], reply: &mut ReplyWriter) -> Result<(), CommandError> {
        if args.len() != 2 {
            return Err(CommandError::Arity);
        }
        let value = self.cache.hget(&args[0], &args[1])?;
        reply.string(value.as_deref());
        Ok(())
    }

    fn hmget(&self, args: &[Bytes], reply: &mut ReplyWriter) -> Result<(), CommandError> {
        if args.len() < 2 {
            return Err(CommandError::Arity);
        }
        let mut values = Vec::with_capacity(args.len() - 1);
        for field in &args[1..] {
            values.push(self.cache.hget(&args[0], field)?);
        }
        reply.string_array(&values);
        Ok(())
    }

    fn hgetall(&self, args: &[Bytes], reply: &mut ReplyWriter) -> Result<(), CommandError> {
        if args.len() != 1 {
            return Err(CommandError::Arity);
        }
        match self.cache.hgetall(&args[0])? {
            Some(pairs) => {
                let mut flat = Vec::with_capacity(pairs.len() * 2);
                for (field, value) in pairs {
                    flat.push(Some(field));
                    flat.push(Some(value));
                }
                reply.string_array(&flat);
            }
            None => reply.null_array(),
        }
        Ok(())
    }

    fn hexists(&self, args: &[Bytes], reply: &mut ReplyWriter) -> Result<(), CommandError> {
        if args.len() != 2 {
            return Err(CommandError::Arity);
        }
        reply.int(self.cache.hexists(&args[0], &args[1])? as i64);
        Ok(())
    }

    fn del(&self, args: &[Bytes], reply: &mut ReplyWriter) -> Result<(), CommandError> {
        if args.is_empty() {
            return Err(CommandError::Arity);
        }
        reply.int(self.cache.remove(args) as i64);
        Ok(())
    }

    fn hdel(&self, args: &[Bytes], reply: &mut ReplyWriter) -> Result<(), CommandError> {
        if args.len() < 2 {
            return Err(CommandError::Arity);
        }
        reply.int(self.cache.hdel(&args[0], &args[1..])? as i64);
        Ok(())
    }

    fn info(&self, args: &[Bytes], reply: &mut ReplyWriter) -> Result<(), CommandError> {
        if !args.is_empty() {
            return Err(CommandError::Arity);
        }

        let sections: [(&str, Vec<(&str, String)>); 3] = [
            (
                "Server",
                vec![
                    ("process_id", std::process::id().to_string()),
                    ("tcp_port", self.port.to_string()),
                ],
            ),
            (
                "Clients",
                vec![("connected_clients", self.stats.active().to_string())],
            ),
            (
                "Memory",
                vec![
                    ("used_memory", self.cache.size().to_string()),
                    ("maxmemory", self.cache.size_limit().to_string()),
                ],
            ),
        ];

        let mut out = String::new();
        for (i, (group, fields)) in sections.iter().enumerate() {
            out.push_str("# ");
            out.push_str(group);
            out.push_str("\r\n");
            for (key, value) in fields {
                out.push_str(key);
                out.push(':');
                out.push_str(value);
                out.push_str("\r\n");
            }
            if i != sections.len() - 1 {
                out.push_str("\r\n");
            }
        }
        reply.string(Some(out.as_bytes()));
        Ok(())
    }

    fn config(&self, args: &[Bytes], reply: &mut ReplyWriter) -> Result<(), CommandError> {
        if args.len() == 3 && args[0].eq_ignore_ascii_case(b"set") {
            if args[1].eq_ignore_ascii_case(b"maxmemory") {
                // the mb suffix is applied in units of 1024 bytes
                match parse_maxmemory_mb(&args[2]) {
                    Some(mb) => {
                        self.cache.set_size_limit(mb * 1024);
                        reply.status("OK");
                        return Ok(());
                    }
                    None => {
                        return Err(CommandError::InvalidMaxmemory(
                            String::from_utf8_lossy(&args[2]).into_owned(),
                        ))
                    }
                }
            }
            if args[1].eq_ignore_ascii_case(b"maxmemory-policy") {
                // only LRU is implemented; accept and ignore the policy
                reply.status("OK");
                return Ok(());
            }
        }
        Err(CommandError::Unsupported)
    }
}

/// Parses a `<digits>mb` value, e.g. `100mb` → 100.
fn parse_maxmemory_mb(value: &[u8]) -> Option<usize> {
    let s = std::str::from_utf8(value).ok()?;
    let digits = s.strip_suffix("mb")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Parses a decimal integer argument.
fn parse_int(arg: &[u8]) -> Result<i64, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::NotAnInteger)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::parse_request;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(
            Arc::new(Cache::new(1 << 20)),
            Arc::new(ConnectionStats::new()),
            6789,
        )
    }

    /// Runs one command and returns the handler result plus reply bytes.
    fn run(d: &Dispatcher, parts: &[&str]) -> (Result<(), CommandError>, Vec<u8>) {
        let args: Vec<Bytes> = parts
            .iter()
            .map(|p| Bytes::copy_from_slice(p.as_bytes()))
            .collect();
        let mut reply = ReplyWriter::new();
        let result = d.dispatch(&args, &mut reply);
        (result, reply.take().to_vec())
    }

    fn ok(d: &Dispatcher, parts: &[&str]) -> Vec<u8> {
        let (result, reply) = run(d, parts);
        assert_eq!(result, Ok(()), "{parts:?} failed");
        reply
    }

    #[test]
    fn test_set_get() {
        let d = dispatcher();

        assert_eq!(ok(&d, &["SET", "foo", "fooValue"]), b"+OK\r\n");
        assert_eq!(ok(&d, &["GET", "foo"]), b"$8\r\nfooValue\r\n");
        assert_eq!(ok(&d, &["EXISTS", "foo"]), b":1\r\n");
        assert_eq!(ok(&d, &["GET", "bar"]), b"$-1\r\n");
        assert_eq!(ok(&d, &["DEL", "foo"]), b":1\r\n");
        assert_eq!(ok(&d, &["GET", "foo"]), b"$-1\r\n");
        assert_eq!(ok(&d, &["DEL", "foo"]), b":0\r\n");
        assert_eq!(ok(&d, &["EXISTS", "foo"]), b":0\r\n");
    }

    #[test]
    fn test_command_names_are_case_insensitive() {
        let d = dispatcher();

        assert_eq!(ok(&d, &["set", "foo", "v"]), b"+OK\r\n");
        assert_eq!(ok(&d, &["GeT", "foo"]), b"$1\r\nv\r\n");
        assert_eq!(ok(&d, &["FLUSHDB"]), b"+OK\r\n");
    }

    #[test]
    fn test_unknown_command() {
        let d = dispatcher();
        let (result, reply) = run(&d, &["PING"]);
        assert_eq!(result, Err(CommandError::Unsupported));
        assert!(reply.is_empty());
    }

    #[test]
    fn test_arity_errors() {
        let d = dispatcher();

        for parts in [
            vec!["SET", "foo"],
            vec!["SET", "foo", "v", "extra"],
            vec!["GET"],
            vec!["GET", "a", "b"],
            vec!["MSET", "foo", "fooValue", "bar"],
            vec!["MGET"],
            vec!["EXISTS"],
            vec!["HSET", "foo", "k1"],
            vec!["HMSET", "foo", "k1"],
            vec!["HMSET", "foo", "k1", "v1", "k2"],
            vec!["HGET", "foo"],
            vec!["HMGET", "foo"],
            vec!["HGETALL"],
            vec!["HEXISTS", "foo"],
            vec!["DEL"],
            vec!["HDEL", "foo"],
            vec!["PEXPIRE", "baz"],
            vec!["FLUSHDB", "now"],
            vec!["INFO", "server"],
        ] {
            let (result, reply) = run(&d, &parts);
            assert_eq!(result, Err(CommandError::Arity), "{parts:?}");
            assert!(reply.is_empty());
        }
    }

    #[test]
    fn test_mset_mget_with_holes() {
        let d = dispatcher();

        assert_eq!(
            ok(&d, &["MSET", "foo", "fooValue", "bar", "barValue", "baz", "bazValue"]),
            b"+OK\r\n"
        );
        assert_eq!(
            ok(&d, &["MGET", "foo", "baz", "none", "bar"]),
            b"*4\r\n$8\r\nfooValue\r\n$8\r\nbazValue\r\n$-1\r\n$8\r\nbarValue\r\n"
        );
        assert_eq!(ok(&d, &["DEL", "bar", "baz", "none"]), b":2\r\n");
    }

    #[test]
    fn test_hash_commands() {
        let d = dispatcher();

        assert_eq!(ok(&d, &["HSET", "foo", "k1", "v1"]), b"+OK\r\n");
        assert_eq!(ok(&d, &["HGET", "foo", "k1"]), b"$2\r\nv1\r\n");
        assert_eq!(ok(&d, &["HEXISTS", "foo", "k1"]), b":1\r\n");
        assert_eq!(ok(&d, &["HGET", "foo", "k2"]), b"$-1\r\n");
        assert_eq!(ok(&d, &["HDEL", "foo", "k1"]), b":1\r\n");
        assert_eq!(ok(&d, &["HGET", "foo", "k1"]), b"$-1\r\n");
        assert_eq!(ok(&d, &["HEXISTS", "foo", "k1"]), b":0\r\n");
    }

    #[test]
    fn test_hmset_hmget_hgetall() {
        let d = dispatcher();

        assert_eq!(
            ok(&d, &["HMSET", "foo", "k1", "v1", "k2", "v2", "k3", "v3"]),
            b"+OK\r\n"
        );
        assert_eq!(
            ok(&d, &["HMGET", "foo", "k1", "k2", "none", "k3"]),
            b"*4\r\n$2\r\nv1\r\n$2\r\nv2\r\n$-1\r\n$2\r\nv3\r\n"
        );

        // HGETALL pair order is unspecified; decode the array and check
        // that fields pair with their values
        let reply = ok(&d, &["HGETALL", "foo"]);
        let (items, consumed) = parse_request(&reply).unwrap().unwrap();
        assert_eq!(consumed, reply.len());
        assert_eq!(items.len(), 6);
        for pair in items.chunks_exact(2) {
            let field = std::str::from_utf8(&pair[0]).unwrap();
            let value = std::str::from_utf8(&pair[1]).unwrap();
            assert_eq!(value, field.replace('k', "v"));
        }

        assert_eq!(ok(&d, &["HDEL", "foo", "k1", "k2"]), b":2\r\n");
        assert_eq!(ok(&d, &["HDEL", "foo", "none", "k3"]), b":1\r\n");
    }

    #[test]
    fn test_hgetall_missing_key_is_null_array() {
        let d = dispatcher();
        assert_eq!(ok(&d, &["HGETALL", "missing"]), b"*-1\r\n");
    }

    #[test]
    fn test_hgetall_emptied_hash_is_empty_array() {
        let d = dispatcher();

        ok(&d, &["HSET", "foo", "k1", "v1"]);
        ok(&d, &["HDEL", "foo", "k1"]);
        // the emptied hash still exists, distinct from a missing key
        assert_eq!(ok(&d, &["HGETALL", "foo"]), b"*0\r\n");
        assert_eq!(ok(&d, &["EXISTS", "foo"]), b":1\r\n");
    }

    #[test]
    fn test_wrongtype_error() {
        let d = dispatcher();

        ok(&d, &["SET", "foo", "v"]);
        let (result, reply) = run(&d, &["HSET", "foo", "f1", "v1"]);
        assert_eq!(result, Err(CommandError::WrongType(WrongType)));
        assert!(reply.is_empty());
        assert_eq!(
            result.unwrap_err().to_string(),
            "WRONGTYPE Operation against a key holding the wrong kind of value"
        );

        // the string was not touched
        assert_eq!(ok(&d, &["GET", "foo"]), b"$1\r\nv\r\n");

        ok(&d, &["HSET", "bar", "f1", "v1"]);
        let (result, _) = run(&d, &["GET", "bar"]);
        assert_eq!(result, Err(CommandError::WrongType(WrongType)));
        let (result, _) = run(&d, &["MGET", "foo", "bar"]);
        assert_eq!(result, Err(CommandError::WrongType(WrongType)));
    }

    #[test]
    fn test_expire_commands() {
        let d = dispatcher();

        ok(&d, &["SET", "foo", "fooValue"]);
        assert_eq!(ok(&d, &["PEXPIRE", "foo", "100"]), b":1\r\n");
        assert_eq!(ok(&d, &["PEXPIRE", "baz", "100"]), b":0\r\n");

        let (result, _) = run(&d, &["PEXPIRE", "baz", "xyz"]);
        assert_eq!(result, Err(CommandError::NotAnInteger));

        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(ok(&d, &["EXISTS", "foo"]), b":1\r\n");
        std::thread::sleep(std::time::Duration::from_millis(60));
        assert_eq!(ok(&d, &["EXISTS", "foo"]), b":0\r\n");
    }

    #[test]
    fn test_expire_uses_seconds() {
        let d = dispatcher();

        ok(&d, &["SET", "foo", "v"]);
        // one second: far enough out that a moment later it still exists
        assert_eq!(ok(&d, &["EXPIRE", "foo", "1"]), b":1\r\n");
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(ok(&d, &["EXISTS", "foo"]), b":1\r\n");

        // non-positive seconds clear the expiration
        assert_eq!(ok(&d, &["EXPIRE", "foo", "0"]), b":1\r\n");
    }

    #[test]
    fn test_flushdb() {
        let d = dispatcher();

        ok(&d, &["MSET", "a", "1", "b", "2"]);
        assert_eq!(ok(&d, &["FLUSHDB"]), b"+OK\r\n");
        assert_eq!(ok(&d, &["GET", "a"]), b"$-1\r\n");
        assert_eq!(ok(&d, &["EXISTS", "b"]), b":0\r\n");
    }

    #[test]
    fn test_config_set_maxmemory() {
        let d = dispatcher();

        assert_eq!(ok(&d, &["CONFIG", "SET", "maxmemory", "100mb"]), b"+OK\r\n");
        assert_eq!(d.cache.size_limit(), 100 * 1024);

        assert_eq!(
            ok(&d, &["CONFIG", "SET", "maxmemory-policy", "allkeys-lru"]),
            b"+OK\r\n"
        );
        // the policy is ignored, the budget is untouched
        assert_eq!(d.cache.size_limit(), 100 * 1024);
    }

    #[test]
    fn test_config_set_maxmemory_malformed() {
        let d = dispatcher();

        for bad in ["100", "mb", "100MB", "10gb", "1.5mb", "-1mb"] {
            let (result, reply) = run(&d, &["CONFIG", "SET", "maxmemory", bad]);
            assert_eq!(
                result,
                Err(CommandError::InvalidMaxmemory(bad.to_string())),
                "{bad}"
            );
            assert!(reply.is_empty());
        }
    }

    #[test]
    fn test_config_other_forms_unsupported() {
        let d = dispatcher();

        for parts in [
            vec!["CONFIG", "GET", "maxmemory"],
            vec!["CONFIG", "SET", "appendonly", "yes"],
            vec!["CONFIG", "SET", "maxmemory"],
            vec!["CONFIG"],
        ] {
            let (result, _) = run(&d, &parts);
            assert_eq!(result, Err(CommandError::Unsupported), "{parts:?}");
        }
    }

    #[test]
    fn test_info_sections() {
        let d = dispatcher();
        ok(&d, &["SET", "foo", "fooValue"]);

        let reply = ok(&d, &["INFO"]);
        let text = String::from_utf8(reply).unwrap();
        assert!(text.starts_with('$'));
        assert!(text.contains("# Server\r\n"));
        assert!(text.contains(&format!("process_id:{}\r\n", std::process::id())));
        assert!(text.contains("tcp_port:6789\r\n"));
        assert!(text.contains("# Clients\r\nconnected_clients:0\r\n"));
        assert!(text.contains("# Memory\r\n"));
        assert!(text.contains(&format!("used_memory:{}\r\n", 3 + 8)));
        assert!(text.contains(&format!("maxmemory:{}\r\n", 1 << 20)));
        // sections are separated by a blank line, with no trailing one
        assert!(text.contains("\r\n\r\n# Clients"));
        assert!(!text.ends_with("\r\n\r\n\r\n"));
    }
}
