//! Shader compiler contract.
//!
//! Samples hand shader source paths to a [`ShaderCompiler`] and get back
//! bytecode or the compiler's diagnostic. [`ExternalCompiler`] drives an
//! offline compiler binary (`glslc` by default) as a subprocess.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use samples_rhi::shader::{ExternalCompiler, ShaderCompiler};
//!
//! # fn example() -> Result<(), samples_rhi::RhiError> {
//! let compiler = ExternalCompiler::glslc();
//! let bytecode = compiler.compile(Path::new("shaders/triangle.hlsl"), "VSMain", "vs_6_0")?;
//! println!("{} words", bytecode.words().len());
//! # Ok(())
//! # }
//! ```

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info};

use crate::error::{RhiError, RhiResult};

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Shader stage type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
    Geometry,
    TessControl,
    TessEvaluation,
}

impl ShaderStage {
    /// Parses the stage out of a target profile such as `vs_6_0` or
    /// `ps_5_1`.
    pub fn from_profile(profile: &str) -> Option<Self> {
        let prefix = profile.split('_').next()?;
        match prefix {
            "vs" => Some(ShaderStage::Vertex),
            "ps" => Some(ShaderStage::Fragment),
            "cs" => Some(ShaderStage::Compute),
            "gs" => Some(ShaderStage::Geometry),
            "hs" => Some(ShaderStage::TessControl),
            "ds" => Some(ShaderStage::TessEvaluation),
            _ => None,
        }
    }

    /// Stage name as spelled on a `glslc -fshader-stage=` flag.
    pub fn glslc_name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vert",
            ShaderStage::Fragment => "frag",
            ShaderStage::Compute => "comp",
            ShaderStage::Geometry => "geom",
            ShaderStage::TessControl => "tesc",
            ShaderStage::TessEvaluation => "tese",
        }
    }

    /// Returns a human-readable name for the shader stage.
    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "Vertex",
            ShaderStage::Fragment => "Fragment",
            ShaderStage::Compute => "Compute",
            ShaderStage::Geometry => "Geometry",
            ShaderStage::TessControl => "TessControl",
            ShaderStage::TessEvaluation => "TessEvaluation",
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Compiled shader code together with the entry point it was built for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderBytecode {
    stage: ShaderStage,
    entry_point: String,
    words: Vec<u32>,
}

impl ShaderBytecode {
    /// Validates and wraps a SPIR-V blob.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::ShaderError`] if the blob is not a whole number of
    /// little-endian words or does not start with the SPIR-V magic number.
    pub fn from_spirv(bytes: &[u8], stage: ShaderStage, entry_point: &str) -> RhiResult<Self> {
        if !bytes.len().is_multiple_of(4) {
            return Err(RhiError::ShaderError(format!(
                "SPIR-V code must be 4-byte aligned, got {} bytes",
                bytes.len()
            )));
        }

        let words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        if words.first() != Some(&SPIRV_MAGIC) {
            return Err(RhiError::ShaderError(
                "missing SPIR-V magic number".to_string(),
            ));
        }

        Ok(Self {
            stage,
            entry_point: entry_point.to_string(),
            words,
        })
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// SPIR-V code words.
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Code as bytes, e.g. for writing back to disk.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }
}

/// Turns shader source into bytecode.
pub trait ShaderCompiler {
    /// Compiles `entry_point` of the source at `path` for `profile`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::ShaderError`] carrying the compiler's diagnostic.
    fn compile(&self, path: &Path, entry_point: &str, profile: &str) -> RhiResult<ShaderBytecode>;
}

/// Runs an offline compiler binary accepting `glslc`-style arguments.
#[derive(Clone, Debug)]
pub struct ExternalCompiler {
    program: PathBuf,
    extra_args: Vec<OsString>,
}

impl ExternalCompiler {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
        }
    }

    /// `glslc` found through `PATH`.
    pub fn glslc() -> Self {
        Self::new("glslc")
    }

    /// Appends an argument passed on every invocation, such as `-O`.
    pub fn with_arg(mut self, arg: impl Into<OsString>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments for one compilation.
    fn arguments(
        &self,
        source: &Path,
        output: &Path,
        stage: ShaderStage,
        entry_point: &str,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        if source.extension().is_some_and(|ext| ext == "hlsl") {
            args.push("-x".into());
            args.push("hlsl".into());
        }
        args.push(format!("-fshader-stage={}", stage.glslc_name()).into());
        args.push(format!("-fentry-point={}", entry_point).into());
        args.extend(self.extra_args.iter().cloned());
        args.push("-o".into());
        args.push(output.into());
        args.push(source.into());
        args
    }
}

fn scratch_output_path() -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("samples-shader-{}-{}.spv", std::process::id(), n))
}

impl ShaderCompiler for ExternalCompiler {
    fn compile(&self, path: &Path, entry_point: &str, profile: &str) -> RhiResult<ShaderBytecode> {
        let stage = ShaderStage::from_profile(profile).ok_or_else(|| {
            RhiError::ShaderError(format!("unknown shader profile '{}'", profile))
        })?;

        let output = scratch_output_path();
        let args = self.arguments(path, &output, stage, entry_point);
        debug!("Running {} {:?}", self.program.display(), args);

        let result = Command::new(&self.program).args(&args).output().map_err(|e| {
            RhiError::ShaderError(format!("failed to run {}: {}", self.program.display(), e))
        })?;

        if !result.status.success() {
            let _ = std::fs::remove_file(&output);
            return Err(RhiError::ShaderError(
                String::from_utf8_lossy(&result.stderr).trim().to_string(),
            ));
        }

        let bytes = std::fs::read(&output).map_err(|e| {
            RhiError::ShaderError(format!("compiler produced no output: {}", e))
        })?;
        let _ = std::fs::remove_file(&output);

        let bytecode = ShaderBytecode::from_spirv(&bytes, stage, entry_point)?;
        info!(
            "Compiled {} ({} shader, entry point '{}')",
            path.display(),
            stage,
            entry_point
        );
        Ok(bytecode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spirv_header() -> Vec<u8> {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x0001_0000u32.to_le_bytes());
        bytes
    }

    #[test]
    fn test_stage_from_profile() {
        assert_eq!(ShaderStage::from_profile("vs_6_0"), Some(ShaderStage::Vertex));
        assert_eq!(ShaderStage::from_profile("ps_5_1"), Some(ShaderStage::Fragment));
        assert_eq!(ShaderStage::from_profile("cs_6_6"), Some(ShaderStage::Compute));
        assert_eq!(ShaderStage::from_profile("lib_6_3"), None);
    }

    #[test]
    fn test_from_spirv_rejects_misaligned() {
        let err = ShaderBytecode::from_spirv(&[0u8; 5], ShaderStage::Vertex, "main").unwrap_err();
        assert!(matches!(err, RhiError::ShaderError(_)));
    }

    #[test]
    fn test_from_spirv_rejects_bad_magic() {
        let err = ShaderBytecode::from_spirv(&[0u8; 8], ShaderStage::Vertex, "main").unwrap_err();
        assert!(matches!(err, RhiError::ShaderError(_)));
    }

    #[test]
    fn test_from_spirv_keeps_words() {
        let bytecode =
            ShaderBytecode::from_spirv(&spirv_header(), ShaderStage::Fragment, "PSMain").unwrap();
        assert_eq!(bytecode.words(), &[SPIRV_MAGIC, 0x0001_0000]);
        assert_eq!(bytecode.as_bytes(), spirv_header().as_slice());
        assert_eq!(bytecode.entry_point(), "PSMain");
        assert_eq!(bytecode.stage(), ShaderStage::Fragment);
    }

    #[test]
    fn test_hlsl_arguments() {
        let compiler = ExternalCompiler::glslc().with_arg("-O");
        let args = compiler.arguments(
            Path::new("shaders/quad.hlsl"),
            Path::new("out.spv"),
            ShaderStage::Vertex,
            "VSMain",
        );
        let args: Vec<String> = args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "-x",
                "hlsl",
                "-fshader-stage=vert",
                "-fentry-point=VSMain",
                "-O",
                "-o",
                "out.spv",
                "shaders/quad.hlsl"
            ]
        );
    }

    #[test]
    fn test_missing_compiler_is_shader_error() {
        let compiler = ExternalCompiler::new("definitely-not-a-shader-compiler");
        let err = compiler
            .compile(Path::new("missing.hlsl"), "main", "ps_6_0")
            .unwrap_err();
        assert!(matches!(err, RhiError::ShaderError(_)));
    }

    #[test]
    fn test_unknown_profile_is_shader_error() {
        let compiler = ExternalCompiler::glslc();
        let err = compiler
            .compile(Path::new("missing.hlsl"), "main", "xx_1_0")
            .unwrap_err();
        assert!(matches!(err, RhiError::ShaderError(_)));
    }
}
