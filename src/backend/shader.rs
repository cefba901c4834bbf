// Shader module loading and hot reload
//
// Vulkan consumes SPIR-V bytecode. Shaders are loaded from disk at runtime
// (build.rs compiles the GLSL sources), validated, and wrapped in modules
// that only live long enough to build a pipeline.

use ash::vk;
use notify::event::EventKind;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};

use crate::error::{RenderError, RenderResult};

const SPIRV_MAGIC: u32 = 0x0723_0203;

fn shader_error(path: &Path, reason: impl ToString) -> RenderError {
    RenderError::Shader {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Read a SPIR-V file into 32-bit words.
pub fn load_spirv(path: &Path) -> RenderResult<Vec<u32>> {
    let file = File::open(path).map_err(|e| shader_error(path, e))?;
    let words = ash::util::read_spv(&mut BufReader::new(file)).map_err(|e| shader_error(path, e))?;

    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(other) => Err(shader_error(
            path,
            format!("bad magic number {:#010x}", other),
        )),
        None => Err(shader_error(path, "file is empty")),
    }
}

pub fn create_shader_module(device: &ash::Device, code: &[u32]) -> RenderResult<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);
    let module = unsafe { device.create_shader_module(&create_info, None) }?;
    Ok(module)
}

/// Load `path` and wrap it in a shader module.
pub fn load_shader_module(device: &ash::Device, path: &Path) -> RenderResult<vk::ShaderModule> {
    let code = load_spirv(path)?;
    create_shader_module(device, &code)
}

fn is_spirv_change(kind: &EventKind, paths: &[PathBuf]) -> bool {
    matches!(kind, EventKind::Modify(_) | EventKind::Create(_))
        && paths
            .iter()
            .any(|p| p.extension().is_some_and(|ext| ext == "spv"))
}

/// Watches shader directories and reports when compiled SPIR-V changes
pub struct ShaderWatcher {
    // Kept alive for as long as events are wanted
    _watcher: RecommendedWatcher,
    events: Receiver<notify::Result<notify::Event>>,
}

impl ShaderWatcher {
    pub fn new<'a>(dirs: impl IntoIterator<Item = &'a Path>) -> RenderResult<Self> {
        let (tx, rx) = channel();
        let mut watcher =
            notify::recommended_watcher(tx).map_err(|e| shader_error(Path::new("."), e))?;

        for dir in dirs {
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .map_err(|e| shader_error(dir, e))?;
            log::info!("Watching {} for shader changes", dir.display());
        }

        Ok(Self {
            _watcher: watcher,
            events: rx,
        })
    }

    /// Drain pending events; true if any `.spv` file was written.
    pub fn poll_changed(&self) -> bool {
        let mut changed = false;
        for event in self.events.try_iter() {
            match event {
                Ok(event) => changed |= is_spirv_change(&event.kind, &event.paths),
                Err(e) => log::warn!("Shader watcher error: {}", e),
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};
    use std::io::Write;

    fn temp_file(name: &str, bytes: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("frame-core-{}-{}", std::process::id(), name));
        let mut file = File::create(&path).unwrap();
        file.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn loads_valid_spirv_words() {
        let mut bytes = Vec::new();
        for word in [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        let path = temp_file("valid.spv", &bytes);

        let words = load_spirv(&path).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], SPIRV_MAGIC);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn rejects_wrong_magic() {
        let path = temp_file("bad.spv", &[0u8; 8]);
        let err = load_spirv(&path).unwrap_err();
        assert!(matches!(err, RenderError::Shader { .. }));
        assert!(err.is_fatal());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn rejects_truncated_file() {
        let path = temp_file("short.spv", &[0x03, 0x02, 0x23]);
        assert!(load_spirv(&path).is_err());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = load_spirv(Path::new("does/not/exist.spv")).unwrap_err();
        assert!(err.to_string().contains("exist.spv"));
    }

    #[test]
    fn only_spirv_writes_trigger_reload() {
        let spv = vec![PathBuf::from("shaders/mesh.frag.spv")];
        let glsl = vec![PathBuf::from("shaders/mesh.frag")];

        assert!(is_spirv_change(&EventKind::Modify(ModifyKind::Any), &spv));
        assert!(is_spirv_change(&EventKind::Create(CreateKind::File), &spv));
        assert!(!is_spirv_change(&EventKind::Modify(ModifyKind::Any), &glsl));
        assert!(!is_spirv_change(&EventKind::Remove(RemoveKind::File), &spv));
    }
}
