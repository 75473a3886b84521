// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

use std::{error::Error, fs::File, path::PathBuf};

use clap::Parser;
use orc_writer::reader::metadata::read_metadata;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// ORC file path
    file: PathBuf,

    /// Display per-stripe row counts and byte lengths
    #[arg(short, long)]
    stripes: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let mut f = File::open(cli.file)?;
    let metadata = read_metadata(&mut f)?;

    println!(
        "compression: {}",
        metadata
            .compression()
            .map(|c| c.to_string())
            .unwrap_or("None".to_string())
    );
    println!("file format version: {}", metadata.file_format_version());
    println!("number of rows: {}", metadata.number_of_rows());
    println!("number of stripes: {}", metadata.stripe_metadatas().len());
    println!("schema:\n{}", metadata.root_data_type());

    if cli.stripes {
        println!("\n=== Stripes ===");
        for (i, stripe_metadata) in metadata.stripe_metadatas().iter().enumerate() {
            println!("stripe index: {i}");
            println!("number of rows: {}", stripe_metadata.number_of_rows());
            println!(
                "index length: {}, data length: {}, footer length: {}",
                stripe_metadata.index_length(),
                stripe_metadata.data_length(),
                stripe_metadata.footer_length(),
            );
            println!();
        }
    }

    Ok(())
}
