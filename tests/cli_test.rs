use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

type StdResult = Result<(), Box<dyn std::error::Error>>;

#[test]
fn hpf_compress_then_expand_round_trips() -> StdResult {
    let temp_dir = tempfile::tempdir()?;
    let raw_path = temp_dir.path().join("raw.bin");
    let packed_path = temp_dir.path().join("packed.hpf");
    let roundtrip_path = temp_dir.path().join("roundtrip.bin");
    std::fs::write(&raw_path, b"the quick brown fox jumps over the lazy dog")?;

    Command::cargo_bin("dalib")?
        .arg("hpf")
        .arg("compress")
        .arg("-i")
        .arg(&raw_path)
        .arg("-o")
        .arg(&packed_path)
        .assert()
        .success();

    let packed = std::fs::read(&packed_path)?;
    assert_eq!(&packed[0..4], &[0x55, 0xAA, 0x02, 0xFF]);

    Command::cargo_bin("dalib")?
        .arg("hpf")
        .arg("expand")
        .arg("-i")
        .arg(&packed_path)
        .arg("-o")
        .arg(&roundtrip_path)
        .assert()
        .success();

    let original = std::fs::read(&raw_path)?;
    let roundtrip = std::fs::read(&roundtrip_path)?;
    assert_eq!(original, roundtrip);
    Ok(())
}

#[test]
fn hpf_expand_rejects_a_file_without_the_header() -> StdResult {
    let temp_dir = tempfile::tempdir()?;
    let bogus_path = temp_dir.path().join("bogus.hpf");
    let out_path = temp_dir.path().join("out.bin");
    std::fs::write(&bogus_path, b"not an hpf frame")?;

    Command::cargo_bin("dalib")?
        .arg("hpf")
        .arg("expand")
        .arg("-i")
        .arg(&bogus_path)
        .arg("-o")
        .arg(&out_path)
        .assert()
        .failure();
    Ok(())
}

#[test]
fn archive_compile_list_and_extract_round_trip() -> StdResult {
    let temp_dir = tempfile::tempdir()?;
    let src_dir = temp_dir.path().join("src");
    let extract_dir = temp_dir.path().join("extracted");
    let dat_path = temp_dir.path().join("assets.dat");
    std::fs::create_dir(&src_dir)?;
    std::fs::write(src_dir.join("ONE.TXT"), b"first entry")?;
    std::fs::write(src_dir.join("TWO.TXT"), b"second entry, a bit longer")?;

    Command::cargo_bin("dalib")?
        .arg("archive")
        .arg("compile")
        .arg(&src_dir)
        .arg(&dat_path)
        .assert()
        .success();

    Command::cargo_bin("dalib")?
        .arg("archive")
        .arg("list")
        .arg(&dat_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("ONE.TXT"))
        .stdout(predicate::str::contains("TWO.TXT"));

    Command::cargo_bin("dalib")?
        .arg("archive")
        .arg("extract")
        .arg(&dat_path)
        .arg(&extract_dir)
        .assert()
        .success();

    assert_eq!(
        std::fs::read(extract_dir.join("ONE.TXT"))?,
        std::fs::read(src_dir.join("ONE.TXT"))?,
    );
    assert_eq!(
        std::fs::read(extract_dir.join("TWO.TXT"))?,
        std::fs::read(src_dir.join("TWO.TXT"))?,
    );
    Ok(())
}

#[test]
fn cipher_selftest_passes_for_every_valid_seed() -> StdResult {
    for seed in 0..=9u8 {
        Command::cargo_bin("dalib")?
            .arg("cipher")
            .arg("selftest")
            .arg("--seed")
            .arg(seed.to_string())
            .assert()
            .success()
            .stdout(predicate::str::contains("cipher selftest passed"));
    }
    Ok(())
}

#[test]
fn cipher_selftest_rejects_an_out_of_range_seed() -> StdResult {
    Command::cargo_bin("dalib")?
        .arg("cipher")
        .arg("selftest")
        .arg("--seed")
        .arg("10")
        .assert()
        .failure();
    Ok(())
}
