//! Shader programs with validation, attribute binding tables and reload.
//!
//! A [`Program`] pairs a vertex-stage and a fragment-stage WGSL source. Sources
//! are parsed and validated with naga before any pipeline sees them, so a bad
//! edit is caught as a [`RenderError::ShaderCompile`] instead of a device error.
//!
//! Failure never leaves a half-updated program behind: a reload that cannot
//! read its files, or whose new source does not compile, keeps the previous
//! sources and compiled state. [`Program::generation`] only moves on success,
//! which is what passes watch to know when to rebuild their pipelines.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use naga::valid::{Capabilities, ValidationFlags, Validator};
use tracing::{debug, info, warn};

use crate::error::{RenderError, RenderResult};
use crate::gpu::GpuContext;

/// Entry point every vertex source must define.
pub const VERTEX_ENTRY: &str = "vs";
/// Entry point every fragment source must define.
pub const FRAGMENT_ENTRY: &str = "fs";

/// A shader file watched by modification time.
#[derive(Debug)]
struct WatchedFile {
    path: PathBuf,
    last_modified: Option<SystemTime>,
}

impl WatchedFile {
    fn new(path: &Path) -> Self {
        let mut file = Self {
            path: path.to_path_buf(),
            last_modified: None,
        };
        file.refresh();
        file
    }

    fn modified(&self) -> Option<SystemTime> {
        fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }

    fn changed(&self) -> bool {
        match self.modified() {
            Some(modified) => self.last_modified.is_none_or(|last| modified > last),
            None => false,
        }
    }

    fn refresh(&mut self) {
        self.last_modified = self.modified();
    }
}

#[derive(Debug)]
struct ProgramFiles {
    vertex: WatchedFile,
    fragment: WatchedFile,
}

/// Validated sources plus what reflection found in them.
#[derive(Clone, Debug)]
pub struct CompiledProgram {
    pub vertex: String,
    pub fragment: String,
    /// `@location` inputs of the vertex entry point, sorted.
    pub vertex_inputs: Vec<u32>,
}

#[derive(Debug)]
pub struct Program {
    label: String,
    vertex: String,
    fragment: String,
    attributes: Vec<(String, u32)>,
    compiled: Option<CompiledProgram>,
    files: Option<ProgramFiles>,
    enabled: bool,
    generation: u64,
    last_error: Option<String>,
}

impl Program {
    /// Creates a program from in-memory sources.
    ///
    /// A compile failure is logged and kept in [`Program::last_error`]; the
    /// program has no effective state and consumers render their fallback.
    pub fn new(label: impl Into<String>, vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        let mut program = Self {
            label: label.into(),
            vertex: String::new(),
            fragment: String::new(),
            attributes: Vec::new(),
            compiled: None,
            files: None,
            enabled: true,
            generation: 0,
            last_error: None,
        };
        let result = program.replace_source(vertex.into(), fragment.into());
        program.note(result);
        program
    }

    /// Loads both stages from disk and watches them for changes.
    ///
    /// A missing file is reported and the program starts empty. Watching
    /// continues, so the program picks the file up once it appears.
    pub fn from_files(
        label: impl Into<String>,
        vertex_path: impl AsRef<Path>,
        fragment_path: impl AsRef<Path>,
    ) -> Self {
        let mut program = Self::new(label, "", "");
        let vertex_path = vertex_path.as_ref();
        let fragment_path = fragment_path.as_ref();
        let result = program.reload_from_files(vertex_path, fragment_path);
        if result.is_err() {
            program.files = Some(ProgramFiles {
                vertex: WatchedFile::new(vertex_path),
                fragment: WatchedFile::new(fragment_path),
            });
        }
        program.note(result);
        program
    }

    /// Binds a named vertex attribute to a slot.
    ///
    /// The slot must be a `@location` input of the vertex entry point. A
    /// binding that breaks a compiled program is rejected: the program keeps
    /// its previous bindings and compiled state, and the failure lands in
    /// [`Program::last_error`]. Without a compiled program the binding is
    /// kept and checked by the next successful compile.
    pub fn with_attribute(mut self, name: impl Into<String>, slot: u32) -> Self {
        let mut attributes = self.attributes.clone();
        attributes.push((name.into(), slot));
        if self.compiled.is_none() {
            self.attributes = attributes;
            return self;
        }

        match compile(&self.label, &self.vertex, &self.fragment, &attributes) {
            Ok(compiled) => {
                self.attributes = attributes;
                self.compiled = Some(compiled);
                self.generation += 1;
                self.last_error = None;
            }
            Err(err) => {
                warn!(label = %self.label, error = %err, "attribute binding rejected, keeping previous program");
                self.last_error = Some(err.to_string());
            }
        }
        self
    }

    /// Replaces both sources and recompiles.
    ///
    /// On failure the previous sources and compiled state stay in place.
    pub fn replace_source(&mut self, vertex: String, fragment: String) -> RenderResult<()> {
        if vertex.is_empty() && fragment.is_empty() && self.compiled.is_none() {
            return Ok(());
        }
        match compile(&self.label, &vertex, &fragment, &self.attributes) {
            Ok(compiled) => {
                self.vertex = vertex;
                self.fragment = fragment;
                self.compiled = Some(compiled);
                self.generation += 1;
                self.last_error = None;
                info!(label = %self.label, generation = self.generation, "program compiled");
                Ok(())
            }
            Err(err) => {
                warn!(label = %self.label, error = %err, "shader compile failed, keeping previous program");
                Err(err)
            }
        }
    }

    /// Re-reads both stages from disk and recompiles.
    ///
    /// If either file cannot be read the call returns
    /// [`RenderError::ResourceMissing`] and nothing changes.
    pub fn reload_from_files(
        &mut self,
        vertex_path: impl AsRef<Path>,
        fragment_path: impl AsRef<Path>,
    ) -> RenderResult<()> {
        let vertex_path = vertex_path.as_ref();
        let fragment_path = fragment_path.as_ref();
        let vertex = read_source(&self.label, vertex_path)?;
        let fragment = read_source(&self.label, fragment_path)?;

        self.files = Some(ProgramFiles {
            vertex: WatchedFile::new(vertex_path),
            fragment: WatchedFile::new(fragment_path),
        });
        self.replace_source(vertex, fragment)
    }

    /// Reloads when a watched file changed on disk.
    ///
    /// Returns `true` if a new program was compiled. Only call between frames.
    pub fn check_reload(&mut self) -> bool {
        let Some(files) = &mut self.files else {
            return false;
        };
        if !files.vertex.changed() && !files.fragment.changed() {
            return false;
        }
        files.vertex.refresh();
        files.fragment.refresh();
        let vertex_path = files.vertex.path.clone();
        let fragment_path = files.fragment.path.clone();

        debug!(label = %self.label, path = ?vertex_path, "shader source changed on disk");
        let result = self.reload_from_files(&vertex_path, &fragment_path);
        self.note(result)
    }

    /// The compiled state passes should build from, or `None` to fall back.
    pub fn effective(&self) -> Option<&CompiledProgram> {
        if self.enabled {
            self.compiled.as_ref()
        } else {
            None
        }
    }

    /// Disabling makes consumers render their fallback until re-enabled.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            self.enabled = enabled;
            self.generation += 1;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_valid(&self) -> bool {
        self.compiled.is_some()
    }

    /// Bumped on every successful recompile or enable toggle.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn vertex_source(&self) -> &str {
        &self.vertex
    }

    pub fn fragment_source(&self) -> &str {
        &self.fragment
    }

    /// The most recent failure that had no caller to return to: the initial
    /// compile, an attribute binding or a watched reload. Cleared on success.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn note(&mut self, result: RenderResult<()>) -> bool {
        match result {
            Ok(()) => {
                self.last_error = None;
                true
            }
            Err(err) => {
                self.last_error = Some(err.to_string());
                false
            }
        }
    }

    pub fn attribute_slot(&self, name: &str) -> Option<u32> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, slot)| *slot)
    }
}

fn read_source(label: &str, path: &Path) -> RenderResult<String> {
    fs::read_to_string(path).map_err(|source| {
        warn!(label, path = %path.display(), error = %source, "shader source not found");
        RenderError::resource_missing(path, source)
    })
}

/// Parses and validates both stages, then checks entry points and attribute slots.
pub fn compile(
    label: &str,
    vertex: &str,
    fragment: &str,
    attributes: &[(String, u32)],
) -> RenderResult<CompiledProgram> {
    let vertex_module = validate(label, vertex)?;
    let vs = find_entry(label, &vertex_module, VERTEX_ENTRY, naga::ShaderStage::Vertex)?;
    let mut vertex_inputs = input_locations(&vertex_module, vs);
    vertex_inputs.sort_unstable();

    let fragment_module = validate(label, fragment)?;
    find_entry(label, &fragment_module, FRAGMENT_ENTRY, naga::ShaderStage::Fragment)?;

    for (name, slot) in attributes {
        if !vertex_inputs.contains(slot) {
            return Err(RenderError::shader_compile(
                label,
                format!("attribute `{name}` is bound to slot {slot}, but `{VERTEX_ENTRY}` has no @location({slot}) input"),
            ));
        }
    }

    Ok(CompiledProgram {
        vertex: vertex.to_owned(),
        fragment: fragment.to_owned(),
        vertex_inputs,
    })
}

fn validate(label: &str, source: &str) -> RenderResult<naga::Module> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| RenderError::shader_compile(label, e.emit_to_string(source)))?;
    Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|e| RenderError::shader_compile(label, e.emit_to_string(source)))?;
    Ok(module)
}

fn find_entry<'m>(
    label: &str,
    module: &'m naga::Module,
    name: &str,
    stage: naga::ShaderStage,
) -> RenderResult<&'m naga::EntryPoint> {
    module
        .entry_points
        .iter()
        .find(|ep| ep.name == name && ep.stage == stage)
        .ok_or_else(|| {
            RenderError::shader_compile(label, format!("missing {stage:?} entry point `{name}`"))
        })
}

fn input_locations(module: &naga::Module, entry: &naga::EntryPoint) -> Vec<u32> {
    let mut locations = Vec::new();
    for arg in &entry.function.arguments {
        match &arg.binding {
            Some(naga::Binding::Location { location, .. }) => locations.push(*location),
            Some(naga::Binding::BuiltIn(_)) => {}
            None => {
                if let naga::TypeInner::Struct { members, .. } = &module.types[arg.ty].inner {
                    for member in members {
                        if let Some(naga::Binding::Location { location, .. }) = member.binding {
                            locations.push(location);
                        }
                    }
                }
            }
        }
    }
    locations
}

/// Runs `build` inside a validation error scope.
///
/// Pipeline creation reports binding and layout mismatches asynchronously;
/// capturing them here turns them into a [`RenderError::ShaderCompile`] the
/// caller can fall back from.
pub(crate) fn scoped_build<T>(
    gpu: &GpuContext,
    label: &str,
    build: impl FnOnce() -> T,
) -> RenderResult<T> {
    gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = build();
    match pollster::block_on(gpu.device.pop_error_scope()) {
        None => Ok(value),
        Some(err) => Err(RenderError::shader_compile(label, err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaders;

    const VS: &str = r#"
        @vertex
        fn vs(@location(0) position: vec3f, @location(1) normal: vec3f) -> @builtin(position) vec4f {
            return vec4f(position + normal * 0.0, 1.0);
        }
    "#;

    const FS_RED: &str = r#"
        @fragment
        fn fs() -> @location(0) vec4f {
            return vec4f(1.0, 0.0, 0.0, 1.0);
        }
    "#;

    const FS_BLUE: &str = r#"
        @fragment
        fn fs() -> @location(0) vec4f {
            return vec4f(0.0, 0.0, 1.0, 1.0);
        }
    "#;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "refract_program_{name}_{}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn valid_program_compiles_and_reflects_inputs() {
        let program = Program::new("lit", VS, FS_RED);
        assert!(program.is_valid());
        assert_eq!(program.generation(), 1);
        assert_eq!(program.effective().unwrap().vertex_inputs, vec![0, 1]);
    }

    #[test]
    fn syntax_error_leaves_no_effective_program() {
        let program = Program::new("broken", VS, "@fragment fn fs( -> {");
        assert!(!program.is_valid());
        assert!(program.effective().is_none());
        assert_eq!(program.generation(), 0);
        assert!(program.last_error().is_some());
    }

    #[test]
    fn missing_entry_point_is_a_compile_error() {
        let fs_wrong_name = FS_RED.replace("fn fs", "fn main");
        let err = compile("renamed", VS, &fs_wrong_name, &[]).unwrap_err();
        assert!(matches!(err, RenderError::ShaderCompile { .. }));
        assert!(err.to_string().contains("`fs`"));
    }

    #[test]
    fn attribute_binding_must_name_a_vertex_input() {
        let bound = Program::new("lit", VS, FS_RED).with_attribute("normal", 1);
        assert!(bound.is_valid());
        assert_eq!(bound.attribute_slot("normal"), Some(1));

        let unbound = Program::new("lit", VS, FS_RED).with_attribute("tangent", 6);
        assert!(unbound.is_valid());
        assert_eq!(unbound.attribute_slot("tangent"), None);
        assert_eq!(unbound.generation(), 1);
        assert!(unbound.last_error().unwrap().contains("tangent"));
    }

    #[test]
    fn rejected_binding_keeps_earlier_bindings() {
        let program = Program::new("lit", VS, FS_RED)
            .with_attribute("normal", 1)
            .with_attribute("tangent", 6);
        assert_eq!(program.attribute_slot("normal"), Some(1));
        assert_eq!(program.generation(), 2);
        assert_eq!(program.effective().unwrap().vertex_inputs, vec![0, 1]);
    }

    #[test]
    fn binding_before_a_good_compile_is_checked_later() {
        let mut program = Program::new("late", VS, "not wgsl").with_attribute("normal", 1);
        assert_eq!(program.attribute_slot("normal"), Some(1));
        program
            .replace_source(VS.to_owned(), FS_RED.to_owned())
            .unwrap();
        assert!(program.last_error().is_none());
        assert!(program.is_valid());
    }

    #[test]
    fn failed_replace_keeps_previous_program() {
        let mut program = Program::new("swap", VS, FS_RED);
        let err = program
            .replace_source(VS.to_owned(), "not wgsl at all".to_owned())
            .unwrap_err();
        assert!(matches!(err, RenderError::ShaderCompile { .. }));
        assert_eq!(program.fragment_source(), FS_RED);
        assert_eq!(program.generation(), 1);
        assert!(program.effective().is_some());
    }

    #[test]
    fn reload_from_missing_file_keeps_previous_program() {
        let dir = scratch_dir("missing");
        let vs_path = dir.join("lit.vs.wgsl");
        let fs_path = dir.join("lit.fs.wgsl");
        fs::write(&vs_path, VS).unwrap();
        fs::write(&fs_path, FS_RED).unwrap();

        let mut program = Program::from_files("lit", &vs_path, &fs_path);
        assert!(program.is_valid());
        let before = program.effective().unwrap().fragment.clone();

        let err = program
            .reload_from_files(&vs_path, dir.join("does_not_exist.wgsl"))
            .unwrap_err();
        assert!(matches!(err, RenderError::ResourceMissing { .. }));
        assert_eq!(program.effective().unwrap().fragment, before);
        assert_eq!(program.generation(), 1);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn check_reload_picks_up_edits() {
        let dir = scratch_dir("edit");
        let vs_path = dir.join("lit.vs.wgsl");
        let fs_path = dir.join("lit.fs.wgsl");
        fs::write(&vs_path, VS).unwrap();
        fs::write(&fs_path, FS_RED).unwrap();

        let mut program = Program::from_files("lit", &vs_path, &fs_path);
        assert!(!program.check_reload());

        // Filesystem mtime granularity can be coarse; force a visibly newer stamp.
        std::thread::sleep(std::time::Duration::from_millis(1100));
        fs::write(&fs_path, FS_BLUE).unwrap();
        assert!(program.check_reload());
        assert_eq!(program.fragment_source(), FS_BLUE);
        assert_eq!(program.generation(), 2);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn disabling_hides_the_program_and_bumps_generation() {
        let mut program = Program::new("lit", VS, FS_RED);
        program.set_enabled(false);
        assert!(program.effective().is_none());
        assert_eq!(program.generation(), 2);
        program.set_enabled(true);
        assert!(program.effective().is_some());
    }

    #[test]
    fn from_files_with_missing_file_starts_empty() {
        let dir = scratch_dir("absent");
        let program = Program::from_files("absent", dir.join("a.wgsl"), dir.join("b.wgsl"));
        assert!(!program.is_valid());
        assert_eq!(program.vertex_source(), "");
        assert!(program.last_error().is_some());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn every_embedded_shader_validates() {
        for (name, vertex, fragment) in shaders::PROGRAMS {
            if let Err(err) = compile(name, vertex, fragment, &[]) {
                panic!("{name}: {err}");
            }
        }
    }
}
