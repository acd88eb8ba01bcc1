//! The line-oriented edit-script format `wceditor` replays (see
//! `main.rs` module docs).

use std::rc::Rc;

use anyhow::{bail, Context};
use wceditor_admin::props::PropChange;
use wceditor_core::context::DirContext;
use wceditor_core::dispatcher::Editor;
use wceditor_core::file_ops::TextDeltaHandler;

/// One line of a parsed edit script, mirroring an editor call.
#[derive(Debug, Clone)]
pub enum Directive {
    /// `open-root`
    OpenRoot,
    /// `add-dir <name>`
    AddDir(String),
    /// `open-dir <name>`
    OpenDir(String),
    /// `close-dir`
    CloseDir,
    /// `delete <name>`
    Delete(String),
    /// `absent-file <name>`
    AbsentFile(String),
    /// `absent-dir <name>`
    AbsentDir(String),
    /// `add-file <name>`
    AddFile(String),
    /// `open-file <name>`
    OpenFile(String),
    /// `text <content>`
    Text(String),
    /// `close-file [expected-md5]`
    CloseFile(Option<String>),
    /// `dir-prop <name> [value|-]`
    DirProp(String, Option<String>),
    /// `file-prop <name> [value|-]`
    FileProp(String, Option<String>),
    /// `close-edit`
    CloseEdit,
}

/// Parse a whole edit script into directives, one per non-blank, non-comment
/// line.
pub fn parse(text: &str) -> anyhow::Result<Vec<Directive>> {
    let mut directives = Vec::new();
    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.splitn(2, char::is_whitespace);
        let cmd = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or_default().trim();

        let directive = match cmd {
            "open-root" => Directive::OpenRoot,
            "add-dir" => Directive::AddDir(require_arg(rest, lineno)?),
            "open-dir" => Directive::OpenDir(require_arg(rest, lineno)?),
            "close-dir" => Directive::CloseDir,
            "delete" => Directive::Delete(require_arg(rest, lineno)?),
            "absent-file" => Directive::AbsentFile(require_arg(rest, lineno)?),
            "absent-dir" => Directive::AbsentDir(require_arg(rest, lineno)?),
            "add-file" => Directive::AddFile(require_arg(rest, lineno)?),
            "open-file" => Directive::OpenFile(require_arg(rest, lineno)?),
            "text" => Directive::Text(rest.to_string()),
            "close-file" => {
                Directive::CloseFile(if rest.is_empty() { None } else { Some(rest.to_string()) })
            }
            "dir-prop" => {
                let (name, value) = split_prop(rest, lineno)?;
                Directive::DirProp(name, value)
            }
            "file-prop" => {
                let (name, value) = split_prop(rest, lineno)?;
                Directive::FileProp(name, value)
            }
            "close-edit" => Directive::CloseEdit,
            other => bail!("line {}: unknown directive '{other}'", lineno + 1),
        };
        directives.push(directive);
    }
    Ok(directives)
}

fn require_arg(rest: &str, lineno: usize) -> anyhow::Result<String> {
    if rest.is_empty() {
        bail!("line {}: missing argument", lineno + 1);
    }
    Ok(rest.to_string())
}

fn split_prop(rest: &str, lineno: usize) -> anyhow::Result<(String, Option<String>)> {
    let mut parts = rest.splitn(2, char::is_whitespace);
    let name = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow::anyhow!("line {}: missing property name", lineno + 1))?
        .to_string();
    let value = parts.next().unwrap_or("-").trim();
    Ok((name, if value == "-" { None } else { Some(value.to_string()) }))
}

/// Drive `editor` through `directives`, maintaining the directory/file
/// baton stack a real producer would hold implicitly in its own call
/// stack.
pub fn replay(editor: &Editor, directives: &[Directive]) -> anyhow::Result<()> {
    let mut dir_stack: Vec<Rc<DirContext>> = Vec::new();
    let mut current_file = None;
    let mut current_handler: Option<TextDeltaHandler> = None;

    for directive in directives {
        match directive {
            Directive::OpenRoot => {
                let root = editor.open_root().context("open-root")?;
                dir_stack.push(root);
            }
            Directive::AddDir(name) => {
                let parent = top_dir(&dir_stack)?;
                let dir = editor
                    .add_directory(name, parent, None)
                    .with_context(|| format!("add-dir {name}"))?
                    .with_context(|| format!("add-dir {name} was skipped"))?;
                dir_stack.push(dir);
            }
            Directive::OpenDir(name) => {
                let parent = top_dir(&dir_stack)?;
                let dir = editor
                    .open_directory(name, parent, 0)
                    .with_context(|| format!("open-dir {name}"))?
                    .with_context(|| format!("open-dir {name} was skipped"))?;
                dir_stack.push(dir);
            }
            Directive::CloseDir => {
                let dir = dir_stack.pop().context("close-dir with no open directory")?;
                editor.close_directory(dir).context("close-dir")?;
            }
            Directive::Delete(name) => {
                let parent = top_dir(&dir_stack)?;
                editor.delete_entry(name, parent).with_context(|| format!("delete {name}"))?;
            }
            Directive::AbsentFile(name) => {
                let parent = top_dir(&dir_stack)?;
                editor
                    .absent_file(name, parent)
                    .with_context(|| format!("absent-file {name}"))?;
            }
            Directive::AbsentDir(name) => {
                let parent = top_dir(&dir_stack)?;
                editor
                    .absent_directory(name, parent)
                    .with_context(|| format!("absent-dir {name}"))?;
            }
            Directive::AddFile(name) => {
                let parent = top_dir(&dir_stack)?;
                let file = editor
                    .add_file(name, parent, None)
                    .with_context(|| format!("add-file {name}"))?
                    .with_context(|| format!("add-file {name} was skipped"))?;
                current_file = Some(file);
            }
            Directive::OpenFile(name) => {
                let parent = top_dir(&dir_stack)?;
                let file = editor
                    .open_file(name, parent, 0)
                    .with_context(|| format!("open-file {name}"))?
                    .with_context(|| format!("open-file {name} was skipped"))?;
                current_file = Some(file);
            }
            Directive::Text(text) => {
                let file = current_file.as_ref().context("text with no open file")?;
                let handler = editor.apply_textdelta(file, None).context("apply-textdelta")?;
                editor
                    .feed_window(&handler, text.as_bytes())
                    .context("feed-window")?;
                editor
                    .close_handler(file, handler, None)
                    .context("close-handler")?;
            }
            Directive::CloseFile(checksum) => {
                let dir = top_dir(&dir_stack)?;
                let file = current_file.take().context("close-file with no open file")?;
                let expected = checksum
                    .as_deref()
                    .map(wceditor_admin::pristine::Checksum::from_hex);
                editor.close_file(dir, file, expected).context("close-file")?;
                current_handler = None;
            }
            Directive::DirProp(name, value) => {
                let dir = top_dir(&dir_stack)?;
                editor.change_dir_prop(
                    dir,
                    PropChange {
                        name: name.clone(),
                        value: value.as_ref().map(|v| v.as_bytes().to_vec()),
                    },
                );
            }
            Directive::FileProp(name, value) => {
                let file = current_file.as_ref().context("file-prop with no open file")?;
                wceditor_core::file_ops::change_file_prop(
                    file,
                    PropChange {
                        name: name.clone(),
                        value: value.as_ref().map(|v| v.as_bytes().to_vec()),
                    },
                );
            }
            Directive::CloseEdit => {
                let outcome = editor.close_edit().context("close-edit")?;
                tracing::info!(?outcome, "edit complete");
            }
        }
    }
    let _ = current_handler;
    Ok(())
}

fn top_dir(stack: &[Rc<DirContext>]) -> anyhow::Result<&Rc<DirContext>> {
    stack.last().context("no directory currently open")
}
