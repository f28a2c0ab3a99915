//! The demo samples.

use std::path::Path;

use bytemuck::{Pod, Zeroable};
use samples_core::FileResolver;
use samples_renderer::{FrameContext, FrameTiming, RenderResult, Sample, StagingUploader};
use samples_rhi::shader::{ExternalCompiler, ShaderCompiler};
use samples_rhi::{BufferDesc, Device, Format, TextureDesc};
use tracing::{debug, info};

/// Names accepted by `--sample`.
pub const SAMPLE_NAMES: [&str; 2] = ["clear", "upload"];

/// Optional extra payload the upload sample looks for in the asset
/// directories.
const UPLOAD_ASSET: &str = "upload.bin";

/// Optional shader the upload sample compiles and stages as raw bytecode.
const SHADER_SOURCE: &str = "shaders/tint.frag";
const SHADER_ENTRY_POINT: &str = "main";
const SHADER_PROFILE: &str = "ps_6_0";

/// Either demo, so one runner type serves both.
pub enum Demo<D: Device> {
    Clear(ClearSample),
    Upload(UploadSample<D>),
}

impl<D: Device> Demo<D> {
    /// Builds the sample called `name`, or `None` for an unknown name.
    pub fn by_name(name: &str, resolver: &FileResolver) -> Option<Self> {
        match name {
            "clear" => Some(Demo::Clear(ClearSample::default())),
            "upload" => Some(Demo::Upload(UploadSample::new(resolver.clone()))),
            _ => None,
        }
    }

    fn inner(&mut self) -> &mut dyn Sample<D> {
        match self {
            Demo::Clear(sample) => sample,
            Demo::Upload(sample) => sample,
        }
    }
}

impl<D: Device> Sample<D> for Demo<D> {
    fn name(&self) -> &str {
        match self {
            Demo::Clear(sample) => <ClearSample as Sample<D>>::name(sample),
            Demo::Upload(sample) => sample.name(),
        }
    }

    fn on_init(&mut self, device: &D, uploader: &mut StagingUploader<'_, D>) -> RenderResult<()> {
        self.inner().on_init(device, uploader)
    }

    fn on_resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        self.inner().on_resize(width, height)
    }

    fn on_update(&mut self, frame_index: usize, timing: &FrameTiming) -> RenderResult<()> {
        self.inner().on_update(frame_index, timing)
    }

    fn on_render(&mut self, frame: &mut FrameContext<'_, D>) -> RenderResult<()> {
        self.inner().on_render(frame)
    }
}

/// Clears the screen to a color that drifts with time.
#[derive(Debug, Default)]
pub struct ClearSample {
    color: [f32; 4],
}

impl ClearSample {
    #[inline]
    pub fn color(&self) -> [f32; 4] {
        self.color
    }
}

fn drifting_color(seconds: f32) -> [f32; 4] {
    let wave = |phase: f32| 0.5 + 0.5 * (seconds + phase).sin();
    [wave(0.0), wave(2.094), wave(4.189), 1.0]
}

impl<D: Device> Sample<D> for ClearSample {
    fn name(&self) -> &str {
        "clear"
    }

    fn on_update(&mut self, _frame_index: usize, timing: &FrameTiming) -> RenderResult<()> {
        self.color = drifting_color(timing.elapsed.as_secs_f32());
        Ok(())
    }

    fn on_render(&mut self, frame: &mut FrameContext<'_, D>) -> RenderResult<()> {
        frame.clear_target(self.color);
        Ok(())
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
}

pub const TRIANGLE: [Vertex; 3] = [
    Vertex {
        position: [0.0, -0.5, 0.0],
        color: [1.0, 0.0, 0.0],
    },
    Vertex {
        position: [0.5, 0.5, 0.0],
        color: [0.0, 1.0, 0.0],
    },
    Vertex {
        position: [-0.5, 0.5, 0.0],
        color: [0.0, 0.0, 1.0],
    },
];

pub const CHECKER_SIZE: u32 = 64;
pub const CHECKER_MIPS: u32 = 4;

/// Two-color RGBA8 checkerboard with 8x8 cells.
pub fn checkerboard(size: u32) -> Vec<u8> {
    let mut texels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let light = ((x / 8) + (y / 8)) % 2 == 0;
            let value = if light { 230 } else { 40 };
            texels.extend_from_slice(&[value, value, value, 255]);
        }
    }
    texels
}

/// Halves an RGBA8 image with a 2x2 box filter.
pub fn downsample(texels: &[u8], size: u32) -> Vec<u8> {
    let half = (size / 2).max(1);
    let at = |x: u32, y: u32, c: u32| texels[((y * size + x) * 4 + c) as usize] as u32;
    let mut out = Vec::with_capacity((half * half * 4) as usize);
    for y in 0..half {
        for x in 0..half {
            for c in 0..4 {
                let (x0, y0) = ((x * 2).min(size - 1), (y * 2).min(size - 1));
                let (x1, y1) = ((x0 + 1).min(size - 1), (y0 + 1).min(size - 1));
                let sum = at(x0, y0, c) + at(x1, y0, c) + at(x0, y1, c) + at(x1, y1, c);
                out.push((sum / 4) as u8);
            }
        }
    }
    out
}

/// Average of an RGBA8 image, as a clear color.
pub fn mean_color(texels: &[u8]) -> [f32; 4] {
    let count = (texels.len() / 4).max(1) as f32;
    let mean = |c: usize| texels.chunks(4).map(|t| t[c] as f32).sum::<f32>() / count / 255.0;
    [mean(0), mean(1), mean(2), 1.0]
}

/// Uploads a vertex buffer, a mipmapped texture and, when present in the
/// asset directories, a raw payload and a compiled shader; then clears to
/// the texture's average color.
pub struct UploadSample<D: Device> {
    resolver: FileResolver,
    compiler: Box<dyn ShaderCompiler>,
    vertices: Option<D::Resource>,
    texture: Option<D::Resource>,
    payload: Option<D::Resource>,
    shader: Option<D::Resource>,
    clear_color: [f32; 4],
}

impl<D: Device> UploadSample<D> {
    /// Compiles shaders with `glslc`.
    pub fn new(resolver: FileResolver) -> Self {
        Self {
            resolver,
            compiler: Box::new(ExternalCompiler::glslc()),
            vertices: None,
            texture: None,
            payload: None,
            shader: None,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }

    pub fn with_compiler(mut self, compiler: impl ShaderCompiler + 'static) -> Self {
        self.compiler = Box::new(compiler);
        self
    }

    /// Compiles [`SHADER_SOURCE`] if the resolver finds it and stages its
    /// bytecode into a GPU buffer. A compile error fails initialization.
    fn upload_shader(
        &mut self,
        device: &D,
        uploader: &mut StagingUploader<'_, D>,
    ) -> RenderResult<()> {
        let path = match self.resolver.resolve(Path::new(SHADER_SOURCE)) {
            Ok(path) => path,
            Err(e) => {
                debug!("No shader to compile: {}", e);
                return Ok(());
            }
        };

        let bytecode = self
            .compiler
            .compile(&path, SHADER_ENTRY_POINT, SHADER_PROFILE)?;
        let code = bytecode.as_bytes();
        let shader = device.create_buffer(&BufferDesc::gpu(code.len() as u64))?;
        uploader.record_copy_data(&shader, code)?;
        info!(
            "Uploading {} shader bytecode ({} words)",
            bytecode.stage(),
            bytecode.words().len()
        );
        self.shader = Some(shader);
        Ok(())
    }

    pub fn vertices(&self) -> Option<&D::Resource> {
        self.vertices.as_ref()
    }

    pub fn texture(&self) -> Option<&D::Resource> {
        self.texture.as_ref()
    }

    pub fn payload(&self) -> Option<&D::Resource> {
        self.payload.as_ref()
    }

    pub fn shader(&self) -> Option<&D::Resource> {
        self.shader.as_ref()
    }
}

impl<D: Device> Sample<D> for UploadSample<D> {
    fn name(&self) -> &str {
        "upload"
    }

    fn on_init(&mut self, device: &D, uploader: &mut StagingUploader<'_, D>) -> RenderResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(&TRIANGLE);
        let vertices = device.create_buffer(&BufferDesc::gpu(bytes.len() as u64))?;
        uploader.record_copy_data(&vertices, bytes)?;

        let desc = TextureDesc::new(CHECKER_SIZE, CHECKER_SIZE, Format::Rgba8Unorm)
            .with_mip_levels(CHECKER_MIPS);
        let texture = device.create_texture(&desc)?;
        let mut level = checkerboard(CHECKER_SIZE);
        let mut size = CHECKER_SIZE;
        for mip in 0..CHECKER_MIPS {
            if mip > 0 {
                level = downsample(&level, size);
                size = (size / 2).max(1);
            }
            uploader.record_copy_data_to_subresource(&texture, mip, &level)?;
        }
        self.clear_color = mean_color(&level);

        match self.resolver.read(Path::new(UPLOAD_ASSET)) {
            Ok(data) => {
                let payload = device.create_buffer(&BufferDesc::gpu(data.len() as u64))?;
                uploader.record_copy_data(&payload, &data)?;
                info!("Uploading {} ({} bytes)", UPLOAD_ASSET, data.len());
                self.payload = Some(payload);
            }
            Err(e) => debug!("No extra payload: {}", e),
        }
        self.upload_shader(device, uploader)?;

        self.vertices = Some(vertices);
        self.texture = Some(texture);
        Ok(())
    }

    fn on_render(&mut self, frame: &mut FrameContext<'_, D>) -> RenderResult<()> {
        frame.clear_target(self.clear_color);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use samples_renderer::{RenderError, SampleRunner};
    use samples_rhi::host::HostDevice;
    use samples_rhi::shader::{SPIRV_MAGIC, ShaderBytecode, ShaderStage};
    use samples_rhi::{Resource, ResourceState, RhiError, RhiResult};

    use super::*;

    /// Compiler returning fixed SPIR-V, or a fixed diagnostic.
    struct CannedCompiler {
        diagnostic: Option<&'static str>,
    }

    impl ShaderCompiler for CannedCompiler {
        fn compile(
            &self,
            path: &Path,
            entry_point: &str,
            profile: &str,
        ) -> RhiResult<ShaderBytecode> {
            assert!(path.ends_with(SHADER_SOURCE));
            assert_eq!(profile, SHADER_PROFILE);
            if let Some(diagnostic) = self.diagnostic {
                return Err(RhiError::ShaderError(diagnostic.to_string()));
            }
            let words = [SPIRV_MAGIC, 0x0001_0300, 0, 8, 0];
            ShaderBytecode::from_spirv(
                bytemuck::cast_slice(&words),
                ShaderStage::Fragment,
                entry_point,
            )
        }
    }

    fn asset_dir_with_shader(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "samples-app-{}-{}",
            name,
            std::process::id()
        ));
        std::fs::create_dir_all(dir.join("shaders")).unwrap();
        std::fs::write(dir.join(SHADER_SOURCE), "void main() {}\n").unwrap();
        dir
    }

    #[test]
    fn test_downsample_averages_quads() {
        let texels = [
            0, 0, 0, 0, 4, 4, 4, 4, //
            8, 8, 8, 8, 12, 12, 12, 12,
        ];
        assert_eq!(downsample(&texels, 2), vec![6, 6, 6, 6]);
    }

    #[test]
    fn test_mips_keep_cells_until_texels_cover_them() {
        let mut level = checkerboard(CHECKER_SIZE);
        let mut size = CHECKER_SIZE;
        while size > 8 {
            level = downsample(&level, size);
            size /= 2;
        }
        // Each texel of the 8x8 level covers exactly one cell.
        assert_eq!(level.len(), 8 * 8 * 4);
        assert!(level.chunks(4).all(|t| t[0] == 230 || t[0] == 40));
    }

    #[test]
    fn test_mean_of_even_checkerboard() {
        let mean = mean_color(&checkerboard(16));
        assert!((mean[0] - 135.0 / 255.0).abs() < 1e-6);
        assert_eq!(mean[3], 1.0);
    }

    #[test]
    fn test_unknown_sample_name() {
        assert!(Demo::<HostDevice>::by_name("triangle", &FileResolver::new()).is_none());
        for name in SAMPLE_NAMES {
            let demo = Demo::<HostDevice>::by_name(name, &FileResolver::new()).unwrap();
            assert_eq!(demo.name(), name);
        }
    }

    #[test]
    fn test_upload_sample_on_host() {
        let device = Arc::new(HostDevice::new());
        let swap_chain = device.create_swap_chain(2, 16, 16).unwrap();
        let sample = UploadSample::<HostDevice>::new(FileResolver::new());
        let mut runner =
            SampleRunner::new(device.clone(), swap_chain, sample, Some(Duration::from_secs(5)))
                .unwrap();

        assert_eq!(runner.init_report().uploads, 1 + CHECKER_MIPS as usize);
        assert_eq!(runner.init_report().transitions, 2);
        runner.run_frames(3).unwrap();
        let sample = runner.shutdown().unwrap();

        let vertices = sample.vertices().unwrap();
        assert_eq!(
            vertices.read_bytes(0).unwrap(),
            bytemuck::cast_slice::<Vertex, u8>(&TRIANGLE)
        );
        let texture = sample.texture().unwrap();
        assert_eq!(texture.read_bytes(0).unwrap(), checkerboard(CHECKER_SIZE));
        assert_eq!(texture.read_bytes(CHECKER_MIPS - 1).unwrap().len(), 8 * 8 * 4);
        assert!(sample.payload().is_none());
        assert!(sample.shader().is_none());
        assert_eq!(texture.state(), ResourceState::GenericRead);
        assert!(device.journal().validation_messages().is_empty());
    }

    #[test]
    fn test_upload_sample_stages_compiled_shader() {
        let dir = asset_dir_with_shader("shader");
        let device = Arc::new(HostDevice::new());
        let swap_chain = device.create_swap_chain(2, 16, 16).unwrap();
        let sample = UploadSample::<HostDevice>::new(FileResolver::with_directories([&dir]))
            .with_compiler(CannedCompiler { diagnostic: None });
        let runner = SampleRunner::new(device.clone(), swap_chain, sample, None).unwrap();

        assert_eq!(runner.init_report().uploads, 2 + CHECKER_MIPS as usize);
        let sample = runner.shutdown().unwrap();
        let shader = sample.shader().unwrap();
        let code = shader.read_bytes(0).unwrap();
        assert_eq!(code.len(), 20);
        assert_eq!(&code[..4], SPIRV_MAGIC.to_le_bytes().as_slice());
        assert_eq!(shader.state(), ResourceState::GenericRead);
        assert!(device.journal().validation_messages().is_empty());

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_shader_diagnostic_fails_init() {
        let dir = asset_dir_with_shader("diagnostic");
        let device = Arc::new(HostDevice::new());
        let swap_chain = device.create_swap_chain(2, 16, 16).unwrap();
        let sample = UploadSample::<HostDevice>::new(FileResolver::with_directories([&dir]))
            .with_compiler(CannedCompiler {
                diagnostic: Some("tint.frag:1: error: syntax error"),
            });

        let result = SampleRunner::new(device, swap_chain, sample, None);
        assert!(matches!(
            result,
            Err(RenderError::Rhi(RhiError::ShaderError(message))) if message.contains("syntax error")
        ));

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_clear_color_follows_time() {
        let mut sample = ClearSample::default();
        let timing = FrameTiming {
            elapsed: Duration::from_secs_f32(1.0),
            ..FrameTiming::default()
        };
        <ClearSample as Sample<HostDevice>>::on_update(&mut sample, 0, &timing).unwrap();
        assert_eq!(sample.color(), drifting_color(1.0));
        assert_eq!(sample.color()[3], 1.0);
    }
}
