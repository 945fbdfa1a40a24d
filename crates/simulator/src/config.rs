//! Simulation configuration.
//!
//! A configuration file is a properties file naming the machine geometry, the number of
//! CPUs and the processes to run:
//!
//! ```text
//! PageBytesLog2 = 4
//! FrameCountLog2 = 2
//! PageCountLog2 = 4
//! LevelOnePTEntryCountLog2 = 2
//! TLBEntryCountLog2 = 1
//! CPUs = 2
//! Processes = A B
//! Process.A.trace = traces/loop
//! Process.B.trace = traces/alloc
//! Process.B.start = 0x10
//! Process.B.quantum = 2
//! ```
//!
//! Trace paths are relative to the directory holding the configuration file.

use std::path::{Path, PathBuf};

use vmm::Geometry;

use crate::{
    ConfigError, ProcessSpec, Properties, Trace, clock::Tick, process::DEFAULT_QUANTUM,
    properties::parse_integer,
};

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub geometry: Geometry,
    pub cpus: usize,
    /// Translate through per-CPU TLBs instead of walking the page table every time.
    pub use_tlb: bool,
    pub processes: Vec<ProcessSpec>,
}

impl SimConfig {
    /// A single-CPU configuration without a TLB or any processes.
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            cpus: 1,
            use_tlb: false,
            processes: Vec::new(),
        }
    }

    pub fn with_cpus(mut self, cpus: usize) -> Self {
        self.cpus = cpus;
        self
    }

    pub fn with_tlb(mut self, use_tlb: bool) -> Self {
        self.use_tlb = use_tlb;
        self
    }

    pub fn with_process(mut self, process: ProcessSpec) -> Self {
        self.processes.push(process);
        self
    }

    /// Reads a configuration file, appending `.properties` if the path has no extension.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let path = if path.extension().is_none() {
            path.with_extension("properties")
        } else {
            path.to_path_buf()
        };
        log::info!("Simulator using config file {}", path.display());
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::parse(&text, &base_dir)
    }

    /// Parses configuration text, resolving trace files against `base_dir`.
    pub fn parse(text: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        Self::from_properties(&Properties::parse(text)?, base_dir)
    }

    pub fn from_properties(props: &Properties, base_dir: &Path) -> Result<Self, ConfigError> {
        let geometry = Geometry::new(
            log2(props, "PageBytesLog2")?,
            log2(props, "FrameCountLog2")?,
            log2(props, "PageCountLog2")?,
            log2(props, "LevelOnePTEntryCountLog2")?,
            log2(props, "TLBEntryCountLog2")?,
        )?;
        let cpus = optional(props, "CPUs", 1usize)?;
        if cpus == 0 {
            return Err(invalid("CPUs", "0"));
        }
        log::info!("CPUs: {cpus}");

        let names = required(props, "Processes")?;
        log::info!("Processes: {names}");
        let mut processes = Vec::new();
        for name in names.split_whitespace() {
            processes.push(process(props, name, base_dir)?);
        }
        if processes.is_empty() {
            return Err(ConfigError::NoProcesses);
        }

        Ok(Self {
            geometry,
            cpus,
            use_tlb: false,
            processes,
        })
    }
}

fn process(props: &Properties, name: &str, base_dir: &Path) -> Result<ProcessSpec, ConfigError> {
    let trace_key = format!("Process.{name}.trace");
    let trace_path: PathBuf = base_dir.join(required(props, &trace_key)?);
    let trace = Trace::load(&trace_path)?;
    let start: Tick = optional(props, &format!("Process.{name}.start"), 0)?;
    let quantum: u32 = optional(props, &format!("Process.{name}.quantum"), DEFAULT_QUANTUM)?;
    if quantum == 0 {
        return Err(invalid(&format!("Process.{name}.quantum"), "0"));
    }
    Ok(ProcessSpec::new(name, trace)
        .with_start(start)
        .with_quantum(quantum))
}

fn required<'a>(props: &'a Properties, key: &str) -> Result<&'a str, ConfigError> {
    props
        .get(key)
        .map(str::trim)
        .ok_or_else(|| ConfigError::Missing(key.to_owned()))
}

fn optional<T: TryFrom<i64>>(props: &Properties, key: &str, default: T) -> Result<T, ConfigError> {
    match props.get(key) {
        None => Ok(default),
        Some(value) => integer(key, value),
    }
}

fn integer<T: TryFrom<i64>>(key: &str, value: &str) -> Result<T, ConfigError> {
    parse_integer(value)
        .and_then(|parsed| T::try_from(parsed).ok())
        .ok_or_else(|| invalid(key, value))
}

fn log2(props: &Properties, key: &str) -> Result<u32, ConfigError> {
    let value = integer(key, required(props, key)?)?;
    log::info!("{key}: {value}");
    Ok(value)
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_owned(),
        value: value.trim().to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const GEOMETRY: &str = "PageBytesLog2=4\nFrameCountLog2=2\nPageCountLog2=4\nLevelOnePTEntryCountLog2=2\nTLBEntryCountLog2=1\n";

    /// A scratch directory holding one trace file, `t.properties`.
    fn scratch() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("t.properties"), "ROOT.TR = NoOp; Syscall_Exit\n").unwrap();
        dir
    }

    #[test]
    fn full_configuration() {
        let dir = scratch();
        let text = format!(
            "{GEOMETRY}CPUs = 2\nProcesses = A B\nProcess.A.trace = t\nProcess.B.trace = t.properties\nProcess.B.start = 0x10\nProcess.B.quantum = 2\n"
        );
        let config = SimConfig::parse(&text, dir.path()).unwrap();
        assert_eq!(config.cpus, 2);
        assert!(!config.use_tlb);
        assert_eq!(config.geometry.page_size(), 16);
        assert_eq!(config.geometry.tlb_entries(), 2);
        assert_eq!(config.processes.len(), 2);
        let [a, b] = &config.processes[..] else {
            panic!("expected two processes");
        };
        assert_eq!((a.name.as_str(), a.start, a.quantum), ("A", 0, DEFAULT_QUANTUM));
        assert_eq!((b.name.as_str(), b.start, b.quantum), ("B", 16, 2));
        assert_eq!(a.trace.len(), 2);
    }

    #[test]
    fn load_appends_the_extension() {
        let dir = scratch();
        fs::write(
            dir.path().join("sim.properties"),
            format!("{GEOMETRY}Processes = A\nProcess.A.trace = t\n"),
        )
        .unwrap();
        let config = SimConfig::load(&dir.path().join("sim")).unwrap();
        assert_eq!(config.cpus, 1);
        assert_eq!(config.processes[0].trace.len(), 2);
    }

    mod errors {
        use super::*;

        #[test]
        fn missing_geometry_key() {
            let err = SimConfig::parse("Processes = A\n", Path::new(".")).unwrap_err();
            assert!(matches!(err, ConfigError::Missing(key) if key == "PageBytesLog2"));
        }

        #[test]
        fn bad_geometry() {
            let text = "PageBytesLog2=4\nFrameCountLog2=2\nPageCountLog2=2\nLevelOnePTEntryCountLog2=3\nTLBEntryCountLog2=1\nProcesses = A\n";
            let err = SimConfig::parse(text, Path::new(".")).unwrap_err();
            assert!(matches!(err, ConfigError::Geometry(_)));
        }

        #[test]
        fn zero_cpus() {
            let text = format!("{GEOMETRY}CPUs = 0\nProcesses = A\n");
            let err = SimConfig::parse(&text, Path::new(".")).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { key, .. } if key == "CPUs"));
        }

        #[test]
        fn non_numeric_start() {
            let dir = scratch();
            let text = format!("{GEOMETRY}Processes = A\nProcess.A.trace = t\nProcess.A.start = soon\n");
            let err = SimConfig::parse(&text, dir.path()).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { value, .. } if value == "soon"));
        }

        #[test]
        fn no_processes() {
            let text = format!("{GEOMETRY}Processes = \n");
            let err = SimConfig::parse(&text, Path::new(".")).unwrap_err();
            assert!(matches!(err, ConfigError::NoProcesses));
        }

        #[test]
        fn missing_trace_file() {
            let dir = scratch();
            let text = format!("{GEOMETRY}Processes = A\nProcess.A.trace = nowhere\n");
            let err = SimConfig::parse(&text, dir.path()).unwrap_err();
            assert!(matches!(err, ConfigError::Trace(crate::TraceError::Io { .. })));
        }
    }
}
