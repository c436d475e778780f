use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::prelude::{ReduceError, ReduceResult};

/// Character standing in for the frame-number digits in a template.
pub const PLACEHOLDER: char = '#';

/// How the pieces of a matched filename are put back together.
#[derive(Debug, Clone, Copy)]
enum Shape {
    /// `prefix_NNNN.ext`
    UnderscoreDelimited,
    /// `prefix.NNNN` (the frame number is the extension)
    NumberAsExtension,
    /// `prefixNNNN.ext`
    Undelimited,
}

impl Shape {
    fn assemble(self, prefix: &str, field: &str, extension: &str) -> String {
        match self {
            Shape::UnderscoreDelimited => format!("{prefix}_{field}.{extension}"),
            Shape::NumberAsExtension => format!("{prefix}.{field}"),
            Shape::Undelimited => format!("{prefix}{field}.{extension}"),
        }
    }
}

/// Candidate filename patterns, tried in order; first match wins. The
/// underscore-delimited shape binds before the number-as-extension shape,
/// which binds before the lazy catch-all.
const CANDIDATES: [(&str, Shape); 3] = [
    (r"^(.*)_([0-9]+)\.(.*)$", Shape::UnderscoreDelimited),
    (r"^([^.]*)\.([0-9]+)$", Shape::NumberAsExtension),
    (r"^(.*?)([0-9]+)\.(.*)$", Shape::Undelimited),
];

struct FilenameParts {
    prefix: String,
    digits: String,
    extension: String,
    shape: Shape,
}

fn split_filename(name: &str) -> ReduceResult<FilenameParts> {
    if name.contains(PLACEHOLDER) {
        return Err(ReduceError::Template(format!(
            "{name} already contains the placeholder character"
        )));
    }

    for (pattern, shape) in CANDIDATES {
        let matcher = Regex::new(pattern).unwrap();
        if let Some(captures) = matcher.captures(name) {
            return Ok(FilenameParts {
                prefix: captures[1].to_string(),
                digits: captures[2].to_string(),
                extension: captures
                    .get(3)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default(),
                shape,
            });
        }
    }

    Err(ReduceError::Template(name.to_string()))
}

/// Derive the `#`-placeholder template matching this filename.
///
/// The digit run is replaced character-for-character, so the template keeps
/// the original fixed zero-padded width.
pub fn filename_to_template(name: &str) -> ReduceResult<String> {
    let parts = split_filename(name)?;
    let field = PLACEHOLDER.to_string().repeat(parts.digits.len());
    Ok(parts.shape.assemble(&parts.prefix, &field, &parts.extension))
}

/// Parse the frame number out of a filename using the same pattern search.
pub fn filename_to_index(name: &str) -> ReduceResult<usize> {
    let parts = split_filename(name)?;
    parts
        .digits
        .parse()
        .map_err(|_| ReduceError::Template(format!("frame number in {name} out of range")))
}

/// Split a full image path into its template and directory.
pub fn filename_to_template_directory(path: &Path) -> ReduceResult<(String, PathBuf)> {
    let image = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| ReduceError::Template(path.display().to_string()))?;
    let directory = path.parent().map(Path::to_path_buf).unwrap_or_default();
    Ok((filename_to_template(image)?, directory))
}

fn placeholder_width(template: &str) -> ReduceResult<usize> {
    let width = template.matches(PLACEHOLDER).count();
    if width == 0 {
        return Err(ReduceError::Template(format!(
            "{template} carries no placeholder run"
        )));
    }
    Ok(width)
}

/// Construct the full path of frame `number` from a template and directory.
pub fn template_and_index_to_filename(
    template: &str,
    directory: &Path,
    number: usize,
) -> ReduceResult<PathBuf> {
    let width = placeholder_width(template)?;
    if let Some(capacity) = 10u64.checked_pow(width as u32) {
        if number as u64 > capacity - 1 {
            return Err(ReduceError::Range(format!(
                "{number} does not fit in {width} digits"
            )));
        }
    }
    let run = PLACEHOLDER.to_string().repeat(width);
    let field = format!("{number:0width$}");
    Ok(directory.join(template.replacen(&run, &field, 1)))
}

/// Find the frame numbers of files in `directory` that match `template`.
///
/// The placeholder run is turned into an exact-width numeric capture, so
/// `foo_####.img` matches `foo_0001.img` but not `foo_12345.img`. The
/// directory is only read, never modified.
pub fn discover_matching_files(template: &str, directory: &Path) -> ReduceResult<Vec<usize>> {
    let width = placeholder_width(template)?;
    let run = PLACEHOLDER.to_string().repeat(width);
    let pattern = format!(
        "^{}$",
        regex::escape(template).replacen(&regex::escape(&run), &format!("([0-9]{{{width}}})"), 1)
    );
    let matcher =
        Regex::new(&pattern).map_err(|error| ReduceError::Template(error.to_string()))?;

    let mut images = Vec::new();
    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(captures) = matcher.captures(name) {
            if let Ok(number) = captures[1].parse() {
                images.push(number);
            }
        }
    }
    images.sort_unstable();
    images.dedup();
    Ok(images)
}
