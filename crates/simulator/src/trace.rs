//! Process instruction traces.
//!
//! A trace file is a properties file. `ROOT.TR` holds a `;`-separated sequence whose
//! elements are either instruction text or `_tag` references. A reference expands to
//! the `_tag.TR` sequence, repeated `_tag.REPS` times (default 1). An element starting
//! with `#` ends its sequence.

use std::{borrow::Cow, fs::File, io::BufReader, path::Path};

use crate::{Properties, TraceError, properties::parse_integer};

/// Maximum nesting of tag references.
const MAX_DEPTH: usize = 64;

/// Maximum number of instructions a trace may expand to.
const MAX_INSTRUCTIONS: usize = 1 << 20;

/// Number of bytes each instruction occupies in the text segment.
pub const BYTES_PER_INSTRUCTION: u64 = 4;

/// An ordered, replayable sequence of instruction tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trace {
    instructions: Vec<String>,
}

impl Trace {
    pub fn new<I, S>(instructions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            instructions: instructions.into_iter().map(Into::into).collect(),
        }
    }

    /// Loads a trace file. `.properties` is appended to paths without an extension.
    pub fn load(path: &Path) -> Result<Self, TraceError> {
        let path = if path.extension().is_none() {
            path.with_extension("properties")
        } else {
            path.to_path_buf()
        };
        let file = File::open(&path).map_err(|source| TraceError::Io {
            path: path.clone(),
            source,
        })?;
        let source_name = path.display().to_string();
        let props = Properties::read(BufReader::new(file)).map_err(|source| TraceError::Syntax {
            source_name: source_name.clone(),
            source,
        })?;
        Self::from_properties(&props, &source_name)
    }

    /// Expands the `ROOT` tag of an already parsed trace file.
    pub fn from_properties(props: &Properties, source_name: &str) -> Result<Self, TraceError> {
        let mut expander = Expander {
            props,
            source_name,
            instructions: Vec::new(),
        };
        expander.expand_tag("ROOT", 0)?;
        Ok(Self {
            instructions: expander.instructions,
        })
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Size of the text segment holding this trace.
    pub fn text_bytes(&self) -> u64 {
        BYTES_PER_INSTRUCTION * self.instructions.len() as u64
    }

    /// Returns the instruction at `index`, or an invalid-instruction marker past the end.
    pub fn get(&self, index: usize) -> Cow<'_, str> {
        match self.instructions.get(index) {
            Some(text) => Cow::Borrowed(text.as_str()),
            None => Cow::Owned(format!("Invalid Instruction at index {index}")),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.instructions.iter().map(String::as_str)
    }
}

struct Expander<'a> {
    props: &'a Properties,
    source_name: &'a str,
    instructions: Vec<String>,
}

impl Expander<'_> {
    fn expand_tag(&mut self, tag: &str, depth: usize) -> Result<(), TraceError> {
        if depth > MAX_DEPTH {
            return Err(TraceError::TooDeep {
                source_name: self.source_name.to_owned(),
                tag: tag.to_owned(),
                limit: MAX_DEPTH,
            });
        }
        let props = self.props;
        let base = props
            .get(&format!("{tag}.TR"))
            .ok_or_else(|| TraceError::MissingTag {
                source_name: self.source_name.to_owned(),
                tag: tag.to_owned(),
            })?;
        let reps = match props.get(&format!("{tag}.REPS")) {
            None => 1,
            Some(value) => parse_integer(value)
                .and_then(|reps| usize::try_from(reps).ok())
                .ok_or_else(|| TraceError::InvalidReps {
                    source_name: self.source_name.to_owned(),
                    tag: tag.to_owned(),
                    value: value.to_owned(),
                })?,
        };
        for _ in 0..reps {
            self.expand_sequence(base, depth)?;
        }
        Ok(())
    }

    fn expand_sequence(&mut self, sequence: &str, depth: usize) -> Result<(), TraceError> {
        for element in sequence.split(';').map(str::trim) {
            if element.is_empty() {
                continue;
            }
            if element.starts_with('#') {
                break;
            }
            if element.starts_with('_') {
                self.expand_tag(element, depth + 1)?;
            } else {
                if self.instructions.len() >= MAX_INSTRUCTIONS {
                    return Err(TraceError::TooLong {
                        source_name: self.source_name.to_owned(),
                        limit: MAX_INSTRUCTIONS,
                    });
                }
                self.instructions.push(element.to_owned());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expand(text: &str) -> Result<Trace, TraceError> {
        Trace::from_properties(&Properties::parse(text).unwrap(), "test")
    }

    #[test]
    fn root_sequence_in_order() {
        let trace = expand("ROOT.TR = loadReg0Immediate 1; NoOp ; Syscall_Exit").unwrap();
        assert_eq!(
            trace.iter().collect::<Vec<_>>(),
            vec!["loadReg0Immediate 1", "NoOp", "Syscall_Exit"]
        );
        assert_eq!(trace.text_bytes(), 12);
    }

    #[test]
    fn tags_expand_with_repetitions() {
        let trace = expand(
            "ROOT.TR = _loop; Syscall_Exit\n_loop.TR = incrReg0 1; _inner\n_loop.REPS = 2\n_inner.TR = NoOp\n",
        )
        .unwrap();
        assert_eq!(
            trace.iter().collect::<Vec<_>>(),
            vec!["incrReg0 1", "NoOp", "incrReg0 1", "NoOp", "Syscall_Exit"]
        );
    }

    #[test]
    fn hash_ends_a_sequence() {
        let trace = expand("ROOT.TR = NoOp; # the rest is ignored; Syscall_Exit").unwrap();
        assert_eq!(trace.len(), 1);
    }

    #[test]
    fn zero_repetitions_expand_to_nothing() {
        let trace = expand("ROOT.TR = _skip; NoOp\n_skip.TR = Syscall_Exit\n_skip.REPS = 0").unwrap();
        assert_eq!(trace.iter().collect::<Vec<_>>(), vec!["NoOp"]);
    }

    #[test]
    fn out_of_range_reads_as_invalid() {
        let trace = Trace::new(["NoOp"]);
        assert_eq!(trace.get(0), "NoOp");
        assert_eq!(trace.get(3), "Invalid Instruction at index 3");
    }

    mod errors {
        use super::*;

        #[test]
        fn missing_root() {
            assert!(matches!(
                expand("OTHER.TR = NoOp"),
                Err(TraceError::MissingTag { tag, .. }) if tag == "ROOT"
            ));
        }

        #[test]
        fn missing_tag() {
            assert!(matches!(
                expand("ROOT.TR = _nowhere"),
                Err(TraceError::MissingTag { tag, .. }) if tag == "_nowhere"
            ));
        }

        #[test]
        fn bad_repetitions() {
            assert!(matches!(
                expand("ROOT.TR = _a\n_a.TR = NoOp\n_a.REPS = -1"),
                Err(TraceError::InvalidReps { .. })
            ));
        }

        #[test]
        fn repetitions_are_bounded() {
            let text = "ROOT.TR = _c\n\
                        _c.TR = _b\n_c.REPS = 1024\n\
                        _b.TR = _a\n_b.REPS = 1024\n\
                        _a.TR = NoOp\n_a.REPS = 1024\n";
            assert!(matches!(
                expand(text),
                Err(TraceError::TooLong { limit, .. }) if limit == MAX_INSTRUCTIONS
            ));
        }

        #[test]
        fn self_reference_is_bounded() {
            assert!(matches!(
                expand("ROOT.TR = _a\n_a.TR = _a"),
                Err(TraceError::TooDeep { .. })
            ));
        }
    }
}
