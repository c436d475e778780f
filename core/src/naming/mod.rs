pub mod template;

pub use template::{
    discover_matching_files, filename_to_index, filename_to_template,
    filename_to_template_directory, template_and_index_to_filename,
};
