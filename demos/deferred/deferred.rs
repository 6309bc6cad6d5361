//! Renders a few frames of the SSAO and blur composition passes without a
//! window.
//!
//! Usage: `cargo run --example deferred -- [scene.json] [shader_dir]`
//!
//! `shader_dir` must contain `fullscreen.vert.spv`, `ssao.frag.spv` and
//! `blur.frag.spv`, compiled from the GLSL sources next to this file.

use std::{fs, path::PathBuf, rc::Rc};

use log::{error, info};
use rand::{rngs::StdRng, SeedableRng};
use tsumiki_render::{
    generate_ssao_noise, CompositionPassBlur, CompositionPassSsao, EngineConfig, FrameCounter,
    Mesh, PassScheduler, PerFrameData, Runtime, Scene, SsaoInputs, SSAO_NOISE_SIZE,
};
use tsumiki_vulkan::{vk, Device, ImageBlockDesc, ShaderProgram, VulkanDevice};

const EXTENT: vk::Extent2D = vk::Extent2D {
    width: 1080,
    height: 720,
};
const FRAME_COUNT: usize = 6;

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        error!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let scene_path = args
        .next()
        .unwrap_or_else(|| "demos/deferred/scene.json".to_string());
    let shader_dir = PathBuf::from(
        args.next()
            .unwrap_or_else(|| "demos/deferred/shaders".to_string()),
    );

    let vulkan = Rc::new(VulkanDevice::new(None)?);
    let device: Rc<dyn Device> = vulkan.clone();

    let config = EngineConfig::builder().build()?;
    let runtime = Rc::new(Runtime::new(&device, config));
    runtime.create_resources()?;

    let scene = Scene::load(&runtime, &scene_path)?;

    let attachment =
        |format| device.create_image_block(&ImageBlockDesc::color_attachment(EXTENT, format));
    let images = [
        attachment(vk::Format::R32G32B32A32_SFLOAT)?,
        attachment(vk::Format::R16G16B16A16_SFLOAT)?,
        device.create_image_block(&ImageBlockDesc::tiling_texture(
            vk::Extent2D {
                width: SSAO_NOISE_SIZE,
                height: SSAO_NOISE_SIZE,
            },
            vk::Format::R8G8B8A8_UNORM,
        ))?,
        attachment(vk::Format::R8_UNORM)?,
        attachment(vk::Format::R8G8B8A8_UNORM)?,
        attachment(vk::Format::R8_UNORM)?,
    ];
    let [position_depth, normal, noise, ssao, secondary, blurred] = images;

    // No geometry pass runs here, so the G-buffer inputs only get their layout.
    for image in [&position_depth, &normal, &secondary] {
        device.prepare_sampled_image(image, None)?;
    }
    let mut rng = StdRng::seed_from_u64(runtime.config().ssao_kernel_seed);
    device.prepare_sampled_image(&noise, Some(&generate_ssao_noise(&mut rng)))?;

    let vertex_code = fs::read(shader_dir.join("fullscreen.vert.spv"))?;
    let ssao_program = Rc::new(ShaderProgram::from_spirv(
        &device,
        &vertex_code,
        &fs::read(shader_dir.join("ssao.frag.spv"))?,
    )?);
    let blur_program = Rc::new(ShaderProgram::from_spirv(
        &device,
        &vertex_code,
        &fs::read(shader_dir.join("blur.frag.spv"))?,
    )?);
    let quad = Rc::new(Mesh::screen_quad(&device)?);

    let mut scheduler = PassScheduler::new();
    scheduler.add_pass(CompositionPassSsao::new(
        &runtime,
        &ssao_program,
        &quad,
        SsaoInputs {
            position_depth,
            normal,
            noise,
        },
        ssao,
    ));
    scheduler.add_pass(CompositionPassBlur::new(
        &runtime,
        &blur_program,
        &quad,
        ssao,
        secondary,
        blurred,
    ));
    scheduler.initialize_all()?;

    let mut counter = FrameCounter::new(runtime.config().max_frames_in_flight);
    for _ in 0..FRAME_COUNT {
        let frame = counter.next_frame();
        runtime.write_per_frame(
            &frame,
            &PerFrameData::from_camera(scene.camera(), EXTENT, &frame),
        )?;
        runtime.write_per_objects(&frame, &scene.object_data())?;

        let recorded = scheduler.record(&frame)?;
        let command_buffers: Vec<vk::CommandBuffer> =
            recorded.iter().map(|(_, command_buffer)| *command_buffer).collect();
        vulkan.submit_and_wait(&command_buffers)?;
        info!(
            "Frame {} (slot {}) submitted {} passes",
            frame.number(),
            frame.index(),
            recorded.len()
        );
    }

    device.wait_idle()?;
    scheduler.shutdown_all();
    drop(scheduler);
    scene.shutdown();
    drop(scene);
    for image in images {
        device.destroy_image_block(image);
    }
    drop((quad, ssao_program, blur_program));
    runtime.free_resources();
    drop(runtime);
    Ok(())
}
