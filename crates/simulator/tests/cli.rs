use std::{fs, path::Path, process::Command};

const CONFIG: &str = "PageBytesLog2 = 4
FrameCountLog2 = 1
PageCountLog2 = 4
LevelOnePTEntryCountLog2 = 2
TLBEntryCountLog2 = 1
CPUs = 2
Processes = A B
Process.A.trace = hello
Process.B.trace = hello
Process.B.start = 0x2
";

fn vmsim(args: &[&str], config: &Path) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_vmsim"))
        .args(args)
        .arg(config)
        .output()
        .unwrap()
}

#[test]
fn runs_a_configuration_file() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("sim.properties"), CONFIG).unwrap();
    fs::write(
        dir.path().join("hello.properties"),
        "ROOT.TR = _twice; printStr hello; Syscall_Exit\n_twice.TR = NoOp\n_twice.REPS = 2\n",
    )
    .unwrap();

    let output = vmsim(&["--tlb"], &dir.path().join("sim"));
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.matches("[PrintString] hello").count(), 2);
    assert!(stdout.contains("Finished at time"));
}

#[test]
fn missing_configuration_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = vmsim(&[], &dir.path().join("absent"));
    assert!(!output.status.success());
}
