// Copyright (c) 2026 Keeper
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]

//! Create or rotate a key directory.
//!
//! Usage: `keygen [DIR] [-curve p256|p384|p521] [-rotate] [-secretseed WORDS]`

use anyhow::{bail, Result};
use keeper::security::curves::Curve;
use keeper::security::keygen;
use std::path::PathBuf;

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .try_init();

    let mut dir = PathBuf::from(".");
    let mut curve = Curve::P256;
    let mut rotate = false;
    let mut secretseed: Option<String> = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-curve" | "--curve" => {
                let v = args.next().unwrap_or_default();
                curve = match Curve::from_name(&v) {
                    Some(c) => c,
                    None => bail!("unknown curve {v:?}"),
                };
            }
            "-rotate" | "--rotate" => rotate = true,
            "-secretseed" | "--secretseed" => {
                secretseed = Some(args.next().unwrap_or_default());
            }
            "-h" | "-help" | "--help" => {
                eprintln!(
                    "usage: keygen [DIR] [-curve p256|p384|p521] [-rotate] [-secretseed WORDS]"
                );
                return Ok(());
            }
            flag if flag.starts_with('-') => bail!("unknown flag {flag:?}"),
            positional => dir = PathBuf::from(positional),
        }
    }

    let generated = match secretseed.as_deref() {
        Some(seed) => keygen::recover(curve, seed)?,
        None => keygen::generate(curve, None)?,
    };
    keygen::save(&dir, &generated, rotate)?;

    println!("keys written to {}", dir.display());
    print!("public key:\n{}", generated.public);
    if secretseed.is_none() {
        println!();
        println!("Keep this secret seed safe; written on paper it is a");
        println!("complete backup of the key pair:");
        println!("\t{}", generated.proquint);
    }
    Ok(())
}
