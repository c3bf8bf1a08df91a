use clap::{App, Arg};
use core_proto::crypto;
use flux::encoding::base64;
use std::fs;
use std::io::{LineWriter, Write};

fn main() {
    let matches = App::new("Key Generator")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("Generates connection keys and session key/iv material for manual testing.")
        .arg(
            Arg::with_name("NKEYS")
                .help("Number of connection keys to generate")
                .required(true),
        )
        .arg(
            Arg::with_name("KEY_FILE")
                .help("Newly generated keys will be appended to this file, one per line")
                .required(false),
        )
        .get_matches();

    let key_count: usize = matches
        .value_of("NKEYS")
        .unwrap()
        .parse()
        .expect("key count must be a valid integer");

    println!("Generating {} connection key(s)", key_count);
    let mut keys = Vec::with_capacity(key_count);
    for _ in 0..key_count {
        let mut raw = [0u8; crypto::KEY_SIZE];
        crypto::random_bytes(&mut raw);
        keys.push(base64::encode(&raw));
    }

    for key in &keys {
        println!("{}", key);
    }

    if let Some(key_file_path) = matches.value_of("KEY_FILE") {
        println!("Writing keys to key file `{}`", key_file_path);

        let key_file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(key_file_path)
            .expect("failed to open key file");

        let mut key_file = LineWriter::new(key_file);
        for key in &keys {
            key_file.write_all(key.as_bytes()).expect("failed to write key");
            key_file.write_all(b"\n").expect("failed to write newline");
        }
    }
}
