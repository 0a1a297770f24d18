use clap::{arg, crate_version, Command};
use dalib::archive::{self, Archive};
use dalib::cipher::{PacketCipher, Seed};
use dalib::hpf;

const RCH: &str = "unreachable was reached";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let long_help = "Examples:
---------
Compress an HPF payload:  `dalib hpf compress -i raw.bin -o packed.hpf`
Expand an HPF payload:    `dalib hpf expand -i packed.hpf -o raw.bin`
List a .dat archive:      `dalib archive list assets.dat`
Extract a .dat archive:   `dalib archive extract assets.dat out_dir`
Compile a directory:      `dalib archive compile src_dir assets.dat`
Exercise the cipher:      `dalib cipher selftest --seed 0`";

    let mut main_cmd = Command::new("dalib")
        .about("Read, write, and transform DarkAges file and wire formats")
        .after_long_help(long_help)
        .version(crate_version!());

    main_cmd = main_cmd.subcommand(
        Command::new("hpf")
            .about("HPF adaptive Huffman codec")
            .subcommand(
                Command::new("compress")
                    .arg(arg!(-i --input <PATH> "input path").required(true))
                    .arg(arg!(-o --output <PATH> "output path").required(true)),
            )
            .subcommand(
                Command::new("expand")
                    .arg(arg!(-i --input <PATH> "input path").required(true))
                    .arg(arg!(-o --output <PATH> "output path").required(true)),
            ),
    );

    main_cmd = main_cmd.subcommand(
        Command::new("archive")
            .about("Indexed .dat container")
            .subcommand(Command::new("list").arg(arg!(<DAT> "archive path")))
            .subcommand(
                Command::new("extract")
                    .arg(arg!(<DAT> "archive path"))
                    .arg(arg!(<DIR> "output directory")),
            )
            .subcommand(
                Command::new("compile")
                    .arg(arg!(<DIR> "input directory"))
                    .arg(arg!(<DAT> "output archive path")),
            ),
    );

    main_cmd = main_cmd.subcommand(
        Command::new("cipher")
            .about("Packet cipher diagnostics")
            .subcommand(
                Command::new("selftest")
                    .arg(arg!(-s --seed <SEED> "salt seed, 0-9").required(true)),
            ),
    );

    let matches = main_cmd.get_matches();

    if let Some(cmd) = matches.subcommand_matches("hpf") {
        if let Some(cmd) = cmd.subcommand_matches("compress") {
            let path_in = cmd.get_one::<String>("input").expect(RCH);
            let path_out = cmd.get_one::<String>("output").expect(RCH);
            let dat = std::fs::read(path_in)?;
            std::fs::write(path_out, hpf::compress(&dat))?;
        }
        if let Some(cmd) = cmd.subcommand_matches("expand") {
            let path_in = cmd.get_one::<String>("input").expect(RCH);
            let path_out = cmd.get_one::<String>("output").expect(RCH);
            let dat = std::fs::read(path_in)?;
            std::fs::write(path_out, hpf::decompress(&dat)?)?;
        }
    }

    if let Some(cmd) = matches.subcommand_matches("archive") {
        if let Some(cmd) = cmd.subcommand_matches("list") {
            let path = cmd.get_one::<String>("DAT").expect(RCH);
            let archive = Archive::open_mmap(path)?;
            for entry in archive.entries() {
                println!("{:>10} {:>10} {}", entry.offset, entry.length, entry.name);
            }
        }
        if let Some(cmd) = cmd.subcommand_matches("extract") {
            let path = cmd.get_one::<String>("DAT").expect(RCH);
            let dir = cmd.get_one::<String>("DIR").expect(RCH);
            let archive = Archive::open_mmap(path)?;
            archive.extract_to(dir)?;
        }
        if let Some(cmd) = cmd.subcommand_matches("compile") {
            let dir = cmd.get_one::<String>("DIR").expect(RCH);
            let path = cmd.get_one::<String>("DAT").expect(RCH);
            archive::compile(dir, path)?;
        }
    }

    if let Some(cmd) = matches.subcommand_matches("cipher") {
        if let Some(cmd) = cmd.subcommand_matches("selftest") {
            let seed: u8 = cmd.get_one::<String>("seed").expect(RCH).parse()?;
            let seed = Seed::new(seed)?;
            let mut cipher = PacketCipher::with_default_keystream(seed);
            cipher.generate_keystream2_table("selftest");
            let payload = [0x01u8, 0x02, 0x03, 0x04, 0x05];
            for use_ks2 in [false, true] {
                let encrypted = cipher.encrypt_client_data(&payload, 0, payload.len(), 0, use_ks2)?;
                let decrypted = cipher.decrypt_client_data(&encrypted, use_ks2)?;
                if decrypted != payload {
                    eprintln!("cipher selftest failed (use_keystream2={use_ks2})");
                    return Err(Box::new(std::fmt::Error));
                }
            }
            println!("cipher selftest passed");
        }
    }

    Ok(())
}
