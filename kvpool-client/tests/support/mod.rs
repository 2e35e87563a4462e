//! In-process RESP server used by the integration tests.
//!
//! Keeps a small map-backed store that understands the commands the client
//! issues, queues commands between MULTI and EXEC per connection, and logs
//! every command it receives.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use kvpool_client::{Pool, StoreConfig};

#[derive(Debug, Clone)]
enum Value {
    String(Vec<u8>),
    List(VecDeque<String>),
    Hash(HashMap<String, String>),
    Set(BTreeSet<String>),
}

#[derive(Default)]
struct Store {
    data: HashMap<String, Value>,
    log: Vec<Vec<String>>,
    connections: usize,
}

pub struct TestServer {
    pub addr: String,
    store: Arc<Mutex<Store>>,
}

impl TestServer {
    /// Every command received so far, in arrival order.
    pub fn log(&self) -> Vec<Vec<String>> {
        self.store.lock().expect("store").log.clone()
    }

    /// Number of TCP connections accepted.
    pub fn connections(&self) -> usize {
        self.store.lock().expect("store").connections
    }

    /// Raw string value of `key`, if it holds one.
    pub fn value(&self, key: &str) -> Option<String> {
        match self.store.lock().expect("store").data.get(key) {
            Some(Value::String(data)) => Some(String::from_utf8_lossy(data).into_owned()),
            _ => None,
        }
    }

    pub fn config(&self) -> StoreConfig {
        StoreConfig::builder(self.addr.clone())
            .max_idle(2)
            .max_active(2)
            .read_timeout(Duration::from_secs(2))
            .write_timeout(Duration::from_secs(2))
            .connect_timeout(Duration::from_secs(2))
            .build()
            .expect("config")
    }

    pub fn pool(&self) -> Pool {
        Pool::new(self.config()).expect("pool")
    }
}

pub fn spawn_server() -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    let store = Arc::new(Mutex::new(Store::default()));

    let shared = store.clone();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(_) => break,
            };
            shared.lock().expect("store").connections += 1;
            let store = shared.clone();
            thread::spawn(move || serve(stream, store));
        }
    });

    TestServer { addr, store }
}

/// Accepts connections and reads commands but never answers.
pub fn spawn_silent_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let mut stream = match stream {
                Ok(stream) => stream,
                Err(_) => break,
            };
            thread::spawn(move || {
                let mut sink = [0u8; 512];
                while matches!(stream.read(&mut sink), Ok(n) if n > 0) {}
            });
        }
    });
    addr
}

/// An address nothing listens on.
pub fn unused_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("addr").to_string()
}

fn serve(stream: TcpStream, store: Arc<Mutex<Store>>) {
    let mut writer = stream.try_clone().expect("clone");
    let mut reader = BufReader::new(stream);
    let mut queue: Option<Vec<Vec<String>>> = None;

    while let Ok(Some(args)) = read_command(&mut reader) {
        store.lock().expect("store").log.push(args.clone());
        let name = args[0].to_ascii_uppercase();
        let response = match name.as_str() {
            "MULTI" => {
                queue = Some(Vec::new());
                simple("OK")
            }
            "DISCARD" => {
                queue = None;
                simple("OK")
            }
            "EXEC" => match queue.take() {
                Some(queued) => {
                    let mut store = store.lock().expect("store");
                    let mut out = format!("*{}\r\n", queued.len()).into_bytes();
                    for cmd in &queued {
                        out.extend(execute(&mut store, cmd));
                    }
                    out
                }
                None => error("ERR EXEC without MULTI"),
            },
            _ => match queue.as_mut() {
                Some(queued) => {
                    queued.push(args);
                    simple("QUEUED")
                }
                None => execute(&mut store.lock().expect("store"), &args),
            },
        };
        if writer.write_all(&response).and_then(|_| writer.flush()).is_err() {
            break;
        }
    }
}

fn execute(store: &mut Store, args: &[String]) -> Vec<u8> {
    let name = args[0].to_ascii_uppercase();
    let arg = |idx: usize| args.get(idx).cloned().unwrap_or_default();
    let data = &mut store.data;

    match name.as_str() {
        "PING" => simple("PONG"),
        "SELECT" => simple("OK"),
        "SET" => {
            data.insert(arg(1), Value::String(arg(2).into_bytes()));
            simple("OK")
        }
        "SETEX" => {
            data.insert(arg(1), Value::String(arg(3).into_bytes()));
            simple("OK")
        }
        "SETNX" => {
            if data.contains_key(&arg(1)) {
                integer(0)
            } else {
                data.insert(arg(1), Value::String(arg(2).into_bytes()));
                integer(1)
            }
        }
        "GET" => match data.get(&arg(1)) {
            Some(Value::String(value)) => bulk(value),
            Some(_) => wrong_type(),
            None => null(),
        },
        "INCR" | "INCRBY" => {
            let delta: i64 = if name == "INCR" { 1 } else { arg(2).parse().unwrap_or(0) };
            let current = match data.get(&arg(1)) {
                Some(Value::String(value)) => match String::from_utf8_lossy(value).parse::<i64>() {
                    Ok(number) => number,
                    Err(_) => return error("ERR value is not an integer or out of range"),
                },
                Some(_) => return wrong_type(),
                None => 0,
            };
            let next = current + delta;
            data.insert(arg(1), Value::String(next.to_string().into_bytes()));
            integer(next)
        }
        "EXISTS" | "EXPIRE" => integer(data.contains_key(&arg(1)) as i64),
        "KEYS" => {
            let pattern = arg(1);
            let mut keys: Vec<&String> = data.keys().filter(|key| glob_match(&pattern, key)).collect();
            keys.sort();
            array(keys.iter().map(|key| bulk(key.as_bytes())))
        }
        "LPUSH" => {
            let entry = data.entry(arg(1)).or_insert_with(|| Value::List(VecDeque::new()));
            match entry {
                Value::List(list) => {
                    list.push_front(arg(2));
                    integer(list.len() as i64)
                }
                _ => wrong_type(),
            }
        }
        "RPOP" => match data.get_mut(&arg(1)) {
            Some(Value::List(list)) => match list.pop_back() {
                Some(value) => bulk(value.as_bytes()),
                None => null(),
            },
            Some(_) => wrong_type(),
            None => null(),
        },
        "LLEN" => match data.get(&arg(1)) {
            Some(Value::List(list)) => integer(list.len() as i64),
            Some(_) => wrong_type(),
            None => integer(0),
        },
        "SADD" => {
            let entry = data.entry(arg(1)).or_insert_with(|| Value::Set(BTreeSet::new()));
            match entry {
                Value::Set(set) => integer(set.insert(arg(2)) as i64),
                _ => wrong_type(),
            }
        }
        "SMEMBERS" => match data.get(&arg(1)) {
            Some(Value::Set(set)) => array(set.iter().map(|m| bulk(m.as_bytes()))),
            Some(_) => wrong_type(),
            None => array(std::iter::empty::<Vec<u8>>()),
        },
        "HSET" | "HMSET" => {
            if args.len() < 4 || args.len() % 2 != 0 {
                return error("ERR wrong number of arguments");
            }
            let entry = data.entry(arg(1)).or_insert_with(|| Value::Hash(HashMap::new()));
            match entry {
                Value::Hash(hash) => {
                    let mut added = 0;
                    for pair in args[2..].chunks(2) {
                        if hash.insert(pair[0].clone(), pair[1].clone()).is_none() {
                            added += 1;
                        }
                    }
                    if name == "HMSET" {
                        simple("OK")
                    } else {
                        integer(added)
                    }
                }
                _ => wrong_type(),
            }
        }
        "HGET" => match data.get(&arg(1)) {
            Some(Value::Hash(hash)) => match hash.get(&arg(2)) {
                Some(value) => bulk(value.as_bytes()),
                None => null(),
            },
            Some(_) => wrong_type(),
            None => null(),
        },
        "HGETALL" => match data.get(&arg(1)) {
            Some(Value::Hash(hash)) => {
                let mut fields: Vec<_> = hash.iter().collect();
                fields.sort();
                array(
                    fields
                        .into_iter()
                        .flat_map(|(f, v)| [bulk(f.as_bytes()), bulk(v.as_bytes())]),
                )
            }
            Some(_) => wrong_type(),
            None => array(std::iter::empty::<Vec<u8>>()),
        },
        "HEXISTS" => match data.get(&arg(1)) {
            Some(Value::Hash(hash)) => integer(hash.contains_key(&arg(2)) as i64),
            _ => integer(0),
        },
        "HINCRBY" => {
            let delta: i64 = arg(3).parse().unwrap_or(0);
            let entry = data.entry(arg(1)).or_insert_with(|| Value::Hash(HashMap::new()));
            match entry {
                Value::Hash(hash) => {
                    let current: i64 = hash.get(&arg(2)).and_then(|v| v.parse().ok()).unwrap_or(0);
                    hash.insert(arg(2), (current + delta).to_string());
                    integer(current + delta)
                }
                _ => wrong_type(),
            }
        }
        "SETBIT" | "GETBIT" => {
            let offset: usize = arg(2).parse().unwrap_or(0);
            let (byte, mask) = (offset / 8, 0x80u8 >> (offset % 8));
            let entry = data.entry(arg(1)).or_insert_with(|| Value::String(Vec::new()));
            match entry {
                Value::String(bytes) => {
                    if bytes.len() <= byte {
                        bytes.resize(byte + 1, 0);
                    }
                    let previous = (bytes[byte] & mask != 0) as i64;
                    if name == "SETBIT" {
                        if arg(3) == "1" {
                            bytes[byte] |= mask;
                        } else {
                            bytes[byte] &= !mask;
                        }
                    }
                    integer(previous)
                }
                _ => wrong_type(),
            }
        }
        _ => error("ERR unknown command"),
    }
}

/// `*` and `?` glob matching, as KEYS uses.
fn glob_match(pattern: &str, text: &str) -> bool {
    fn matches(p: &[u8], t: &[u8]) -> bool {
        match (p.first(), t.first()) {
            (None, None) => true,
            (Some(b'*'), _) => matches(&p[1..], t) || (!t.is_empty() && matches(p, &t[1..])),
            (Some(b'?'), Some(_)) => matches(&p[1..], &t[1..]),
            (Some(a), Some(b)) if a == b => matches(&p[1..], &t[1..]),
            _ => false,
        }
    }
    matches(pattern.as_bytes(), text.as_bytes())
}

fn read_command(reader: &mut BufReader<TcpStream>) -> std::io::Result<Option<Vec<String>>> {
    let mut line = Vec::new();
    if read_line(reader, &mut line)?.is_none() {
        return Ok(None);
    }
    if line.first() != Some(&b'*') {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected array"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        read_line(reader, &mut line)?.ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"))?;
        if line.first() != Some(&b'$') {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
        if crlf != [b'\r', b'\n'] {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "missing crlf"));
        }
        args.push(String::from_utf8_lossy(&data).into_owned());
    }
    Ok(Some(args))
}

fn read_line(reader: &mut BufReader<TcpStream>, buf: &mut Vec<u8>) -> std::io::Result<Option<()>> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Ok(None);
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(Some(()))
}

fn parse_usize(data: &[u8]) -> std::io::Result<usize> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "digit"))
}

fn simple(msg: &str) -> Vec<u8> {
    format!("+{}\r\n", msg).into_bytes()
}

fn error(msg: &str) -> Vec<u8> {
    format!("-{}\r\n", msg).into_bytes()
}

fn wrong_type() -> Vec<u8> {
    error("WRONGTYPE Operation against a key holding the wrong kind of value")
}

fn integer(value: i64) -> Vec<u8> {
    format!(":{}\r\n", value).into_bytes()
}

fn null() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}

fn bulk(data: &[u8]) -> Vec<u8> {
    let mut out = format!("${}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

fn array(items: impl Iterator<Item = Vec<u8>>) -> Vec<u8> {
    let items: Vec<Vec<u8>> = items.collect();
    let mut out = format!("*{}\r\n", items.len()).into_bytes();
    for item in items {
        out.extend(item);
    }
    out
}
