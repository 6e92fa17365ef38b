use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use ssdb_client::{Arg, Config, Error, FieldDef, Pool, Record, WireField};

type Handler = fn(usize, &[String]) -> Option<Vec<String>>;

/// Spawns an in-process SSDB server on an ephemeral port. The handler gets
/// the connection index and the decoded command; returning `None` closes
/// that connection.
fn spawn_server(handler: Handler) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    thread::spawn(move || {
        for (idx, stream) in listener.incoming().enumerate() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(_) => return,
            };
            thread::spawn(move || serve_connection(idx, stream, handler));
        }
    });

    addr
}

fn serve_connection(idx: usize, stream: TcpStream, handler: Handler) {
    let mut reader = BufReader::new(stream.try_clone().expect("clone"));
    let mut stream = stream;
    while let Some(args) = read_command(&mut reader) {
        match handler(idx, &args) {
            Some(blocks) => write_reply(&mut stream, &blocks),
            None => return,
        }
    }
}

fn read_command(reader: &mut BufReader<TcpStream>) -> Option<Vec<String>> {
    let mut args = Vec::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        let bytes = reader.read_until(b'\n', &mut line).ok()?;
        if bytes == 0 {
            return None;
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        if line.is_empty() {
            if args.is_empty() {
                continue;
            }
            return Some(args);
        }
        let len: usize = std::str::from_utf8(&line).expect("utf8").parse().expect("length");
        let mut data = vec![0u8; len + 1];
        reader.read_exact(&mut data).ok()?;
        data.truncate(len);
        args.push(String::from_utf8(data).expect("utf8 block"));
    }
}

fn write_reply(stream: &mut TcpStream, blocks: &[String]) {
    let mut out = Vec::new();
    for block in blocks {
        out.extend_from_slice(block.len().to_string().as_bytes());
        out.push(b'\n');
        out.extend_from_slice(block.as_bytes());
        out.push(b'\n');
    }
    out.push(b'\n');
    let _ = stream.write_all(&out);
    let _ = stream.flush();
}

fn blocks(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn pool_with_capacity(addr: String, capacity: usize) -> Pool {
    Pool::new(Config {
        addr,
        capacity: Some(capacity),
        connect_timeout: Some(Duration::from_secs(1)),
        read_timeout: Some(Duration::from_secs(2)),
        write_timeout: Some(Duration::from_secs(2)),
    })
}

#[test]
fn set_get_delete_roundtrip() {
    let addr = spawn_server(|_, args| {
        Some(match args[0].as_str() {
            "set" => {
                assert_eq!(args[1], "k");
                assert_eq!(args[2], "v");
                blocks(&["ok", "1"])
            }
            "get" => {
                assert_eq!(args[1], "k");
                blocks(&["ok", "v"])
            }
            "del" => blocks(&["ok", "1"]),
            _ => blocks(&["client_error"]),
        })
    });

    let pool = pool_with_capacity(addr, 2);
    let mut conn = pool.acquire().expect("acquire");
    conn.set("k", "v").expect("set");
    assert_eq!(conn.get("k").expect("get").as_deref(), Some("v"));
    assert!(conn.delete("k").expect("del"));
}

#[test]
fn get_missing_key_returns_none() {
    let addr = spawn_server(|_, _| Some(blocks(&["not_found"])));

    let pool = pool_with_capacity(addr, 1);
    let mut conn = pool.acquire().expect("acquire");
    assert_eq!(conn.get("missing").expect("get"), None);
    drop(conn);
    // A not_found status is a command-level outcome; the connection stays
    // reusable and goes back to the pool.
    assert_eq!(pool.idle_connections(), 1);
}

#[test]
fn command_error_does_not_taint_connection() {
    let addr = spawn_server(|_, args| {
        Some(if args[0] == "boom" {
            blocks(&["error"])
        } else {
            blocks(&["ok", "1"])
        })
    });

    let pool = pool_with_capacity(addr, 1);
    let mut conn = pool.acquire().expect("acquire");
    let err = conn.execute(&[Arg::from("boom")]).expect_err("status error");
    assert!(matches!(err, Error::Command(status) if status == "error"));
    assert!(!conn.is_tainted());

    // Same connection keeps working after the command failure.
    conn.execute(&[Arg::from("incr"), Arg::from("n")]).expect("execute");
    drop(conn);
    assert_eq!(pool.idle_connections(), 1);
}

#[test]
fn batch_reports_partial_failure_with_all_outcomes() {
    let addr = spawn_server(|_, args| {
        Some(if args[0] == "boom" {
            blocks(&["error"])
        } else {
            blocks(&["ok", "1"])
        })
    });

    let pool = pool_with_capacity(addr, 1);
    let mut conn = pool.acquire().expect("acquire");
    let batch = vec![
        vec![Arg::from("set"), Arg::from("a"), Arg::from("1")],
        vec![Arg::from("boom")],
        vec![Arg::from("get"), Arg::from("a")],
    ];
    let (outcomes, err) = conn.execute_batch(&batch);

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].is_ok());
    assert!(matches!(&outcomes[1], Err(Error::Command(status)) if status == "error"));
    assert!(outcomes[2].is_ok());
    assert!(matches!(err, Some(Error::BatchPartial { failed: 1, total: 3 })));
}

#[test]
fn unrecognized_status_taints_connection() {
    let addr = spawn_server(|_, _| Some(blocks(&["weird"])));

    let pool = pool_with_capacity(addr, 1);
    let mut conn = pool.acquire().expect("acquire");
    let err = conn.execute(&[Arg::from("get"), Arg::from("k")]).expect_err("protocol");
    assert!(matches!(err, Error::Protocol(_)));
    assert!(conn.is_tainted());
    drop(conn);
    assert_eq!(pool.idle_connections(), 0);
}

#[test]
fn transport_error_evicts_connection_from_pool() {
    // The first connection is dropped by the server right after it reads a
    // command; later connections behave.
    let addr = spawn_server(|idx, _| {
        if idx == 0 {
            None
        } else {
            Some(blocks(&["ok", "1"]))
        }
    });

    let pool = pool_with_capacity(addr, 2);
    let mut conn = pool.acquire().expect("acquire");
    let err = conn.execute(&[Arg::from("get"), Arg::from("k")]).expect_err("io");
    assert!(matches!(err, Error::Io(_)));
    assert!(conn.is_tainted());
    drop(conn);
    assert_eq!(pool.idle_connections(), 0);

    // The tainted socket never comes back; a fresh dial succeeds.
    let mut conn = pool.acquire().expect("acquire fresh");
    conn.execute(&[Arg::from("get"), Arg::from("k")]).expect("execute");
}

#[test]
fn idle_queue_never_exceeds_capacity() {
    let addr = spawn_server(|_, _| Some(blocks(&["ok"])));

    let capacity = 2;
    let pool = pool_with_capacity(addr, capacity);
    let mut workers = Vec::new();
    for _ in 0..8 {
        let pool = pool.clone();
        workers.push(thread::spawn(move || {
            for _ in 0..3 {
                let mut conn = pool.acquire().expect("acquire");
                conn.execute(&[Arg::from("ping")]).expect("ping");
            }
        }));
    }
    for worker in workers {
        worker.join().expect("worker");
    }

    let idle = pool.idle_connections();
    assert!(idle >= 1 && idle <= capacity, "idle {idle}");
}

#[test]
fn close_drains_idle_connections() {
    let addr = spawn_server(|_, _| Some(blocks(&["ok"])));

    let pool = pool_with_capacity(addr, 2);
    let conn = pool.acquire().expect("acquire");
    conn.release();
    assert_eq!(pool.idle_connections(), 1);

    pool.close();
    assert_eq!(pool.idle_connections(), 0);

    // A connection checked out across close is closed by its own release.
    let mut conn = pool.acquire().expect("acquire after close");
    conn.execute(&[Arg::from("ping")]).expect("ping");
    drop(conn);
    assert_eq!(pool.idle_connections(), 0);
}

#[test]
fn deadline_timeout_taints_connection() {
    let addr = spawn_server(|_, args| {
        if args[0] == "slow" {
            thread::sleep(Duration::from_millis(500));
        }
        Some(blocks(&["ok"]))
    });

    let pool = pool_with_capacity(addr, 1);
    let mut conn = pool.acquire().expect("acquire");
    conn.set_deadline(Some(Duration::from_millis(100))).expect("deadline");
    let err = conn.execute(&[Arg::from("slow")]).expect_err("timeout");
    assert!(matches!(err, Error::Io(_)));
    assert!(conn.is_tainted());
    drop(conn);
    assert_eq!(pool.idle_connections(), 0);
}

#[derive(Debug, Default, PartialEq)]
struct Profile {
    name: String,
    age: u32,
}

impl Record for Profile {
    fn fields() -> &'static [FieldDef] {
        const FIELDS: &[FieldDef] = &[
            FieldDef::tagged("name", "name"),
            FieldDef::tagged("age", "age"),
        ];
        FIELDS
    }

    fn read_field(&self, path: &[&str]) -> Option<Arg> {
        match path {
            ["name"] => Some(self.name.to_arg()),
            ["age"] => Some(self.age.to_arg()),
            _ => None,
        }
    }

    fn write_field(&mut self, path: &[&str], raw: &str) -> ssdb_client::Result<()> {
        match path {
            ["name"] => self.name.assign(raw),
            ["age"] => self.age.assign(raw),
            _ => Err(Error::Argument(format!("no field at {path:?}"))),
        }
    }
}

#[test]
fn hash_commands_map_records() {
    let addr = spawn_server(|_, args| {
        Some(match args[0].as_str() {
            "multi_hset" => {
                assert_eq!(args[1..], ["profile", "name", "amy", "age", "7"]);
                blocks(&["ok", "2"])
            }
            "hgetall" => blocks(&["ok", "name", "amy", "age", "7"]),
            "multi_hget" => {
                assert_eq!(args[1..], ["profile", "name"]);
                blocks(&["ok", "name", "amy"])
            }
            _ => blocks(&["client_error"]),
        })
    });

    let pool = pool_with_capacity(addr, 1);
    let mut conn = pool.acquire().expect("acquire");

    let profile = Profile {
        name: "amy".to_string(),
        age: 7,
    };
    conn.multi_hset("profile", &profile, &[]).expect("multi_hset");

    let mut full = Profile::default();
    conn.multi_hget("profile", &mut full, &[]).expect("hgetall");
    assert_eq!(full, profile);

    let mut partial = Profile::default();
    conn.multi_hget("profile", &mut partial, &["name"]).expect("multi_hget");
    assert_eq!(partial.name, "amy");
    assert_eq!(partial.age, 0);
}
