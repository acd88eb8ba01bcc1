//! Three-way text merge (spec §6 "Merge service"). The original shells out
//! to an external `diff3`-compatible tool or a library merge; this crate
//! only needs a merge that produces a well-formed conflict-marker result
//! when the three texts genuinely diverge, so a line-based implementation
//! is used directly rather than invoking a subprocess.

/// The result of a three-way text merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Merged without conflicts; the result bytes.
    Clean(Vec<u8>),
    /// Merged with conflict markers embedded in the result bytes.
    Conflicted { merged_with_markers: Vec<u8> },
}

/// Performs a three-way merge of file content.
pub trait TextMerge {
    /// Merge `new_base` and `working`, both diverged from `old_base`.
    fn merge(&self, old_base: &[u8], new_base: &[u8], working: &[u8]) -> anyhow::Result<MergeOutcome>;
}

/// A minimal diff3-shaped merge: line-by-line, three-way. Any line where
/// `working` and `new_base` both changed from `old_base` to *different*
/// values is a conflict; otherwise the non-`old_base` side wins.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineMerge;

impl TextMerge for LineMerge {
    fn merge(&self, old_base: &[u8], new_base: &[u8], working: &[u8]) -> anyhow::Result<MergeOutcome> {
        let old_lines = split_lines(old_base);
        let new_lines = split_lines(new_base);
        let working_lines = split_lines(working);

        let len = old_lines.len().max(new_lines.len()).max(working_lines.len());
        let mut out: Vec<u8> = Vec::new();
        let mut conflicted = false;

        for i in 0..len {
            let old = old_lines.get(i).copied().unwrap_or(&[][..]);
            let new = new_lines.get(i).copied().unwrap_or(&[][..]);
            let working = working_lines.get(i).copied().unwrap_or(&[][..]);

            if new == old {
                out.extend_from_slice(working);
                out.push(b'\n');
            } else if working == old || working == new {
                out.extend_from_slice(new);
                out.push(b'\n');
            } else {
                conflicted = true;
                out.extend_from_slice(b"<<<<<<< mine\n");
                out.extend_from_slice(working);
                out.extend_from_slice(b"\n=======\n");
                out.extend_from_slice(new);
                out.extend_from_slice(b"\n>>>>>>> theirs\n");
            }
        }

        if conflicted {
            Ok(MergeOutcome::Conflicted {
                merged_with_markers: out,
            })
        } else {
            Ok(MergeOutcome::Clean(out))
        }
    }
}

fn split_lines(bytes: &[u8]) -> Vec<&[u8]> {
    if bytes.is_empty() {
        return Vec::new();
    }
    bytes.split(|b| *b == b'\n').collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmodified_side_takes_the_other_change() {
        let old = b"a\nb\nc";
        let new = b"a\nX\nc";
        let working = b"a\nb\nc";
        let result = LineMerge.merge(old, new, working).unwrap();
        assert_eq!(result, MergeOutcome::Clean(b"a\nX\nc\n".to_vec()));
    }

    #[test]
    fn divergent_edits_conflict() {
        let old = b"a\nb\nc";
        let new = b"a\nX\nc";
        let working = b"a\nY\nc";
        match LineMerge.merge(old, new, working).unwrap() {
            MergeOutcome::Conflicted { merged_with_markers } => {
                let text = String::from_utf8(merged_with_markers).unwrap();
                assert!(text.contains("<<<<<<< mine"));
                assert!(text.contains(">>>>>>> theirs"));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }
}
