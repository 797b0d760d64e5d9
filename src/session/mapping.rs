use std::path::Path;

/// A position as one side of the source mapping sees it. Lines and columns
/// are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub path: String,
    pub line: u32,
    pub column: u32,
}

/// Translates between positions in the loaded program and positions in the
/// sources the user edits.
pub trait SourceMapper: Send + Sync {
    /// Program position to authored source position.
    fn map_to_source(&self, location: SourceLocation) -> SourceLocation;
    /// Authored source position to program position.
    fn map_from_source(&self, location: SourceLocation) -> SourceLocation;
}

/// Builds the mapper once the program is loaded, from the directory holding
/// the program and the workspace root.
pub type MapperFactory = Box<dyn Fn(&Path, &Path) -> Box<dyn SourceMapper> + Send + Sync>;

/// Mapper for programs that are their own source.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityMapper;

impl SourceMapper for IdentityMapper {
    fn map_to_source(&self, location: SourceLocation) -> SourceLocation {
        location
    }

    fn map_from_source(&self, location: SourceLocation) -> SourceLocation {
        location
    }
}

pub fn identity_factory() -> MapperFactory {
    Box::new(|_, _| Box::new(IdentityMapper))
}

/// Workspace-relative form of `path`, with forward slashes.
pub fn normalize_path(path: &str, workspace: &Path) -> String {
    let path = path.replace('\\', "/");
    let root = workspace.to_string_lossy().replace('\\', "/");
    let root = root.trim_end_matches('/');
    match path.strip_prefix(root).and_then(|rest| rest.strip_prefix('/')) {
        Some(relative) if !root.is_empty() => relative.to_string(),
        _ => path,
    }
}

/// Absolute form of a workspace-relative `path`.
pub fn qualify_path(path: &str, workspace: &Path) -> String {
    if Path::new(path).is_absolute() {
        return path.to_string();
    }
    workspace.join(path).to_string_lossy().into_owned()
}
