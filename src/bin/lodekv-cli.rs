//! Send one command to a lodekv server and print the reply.
//!
//!   lodekv-cli set foo bar
//!   lodekv-cli zquery scores -inf "" 0 10

use anyhow::{bail, Context, Result};
use lodekv::*;
use std::io::{Read, Write};
use std::net::TcpStream;

fn print_reply(r: &Reply, depth: usize) {
    let pad = "  ".repeat(depth);
    match r {
        Reply::Nil => println!("{}(nil)", pad),
        Reply::Err { code, msg } => println!("{}(err) {} {}", pad, code, msg),
        Reply::Str(s) => println!("{}(str) {}", pad, String::from_utf8_lossy(s)),
        Reply::Int(i) => println!("{}(int) {}", pad, i),
        Reply::Dbl(f) => println!("{}(dbl) {}", pad, f),
        Reply::Arr(items) => {
            println!("{}(arr) len={}", pad, items.len());
            for it in items {
                print_reply(it, depth + 1);
            }
            println!("{}(arr) end", pad);
        }
    }
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        bail!("usage: lodekv-cli <command> [args...]");
    }
    let addr = "127.0.0.1:1234";

    let mut s = TcpStream::connect(addr).with_context(|| format!("connect {}", addr))?;
    s.write_all(&encode_request(&args)?)?;

    let mut buf = Vec::with_capacity(FRAME_HEADER + K_MAX_MSG);
    let mut chunk = [0u8; 1024];
    loop {
        if let Some((_, reply)) = decode_reply_frame(&buf)? {
            print_reply(&reply, 0);
            return Ok(());
        }
        let n = s.read(&mut chunk)?;
        if n == 0 {
            bail!("server closed the connection");
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}
