#![allow(dead_code)]

use std::{fs, path::PathBuf, rc::Rc};

use tsumiki_render::{EngineConfig, Mesh, Runtime};
use tsumiki_vulkan::{vk, Device, ImageBlock, ImageBlockDesc, MockDevice, ShaderProgram};

pub struct Fixture {
    pub mock: Rc<MockDevice>,
    pub device: Rc<dyn Device>,
    pub runtime: Rc<Runtime>,
}

pub fn fixture() -> Fixture {
    fixture_with(EngineConfig::default())
}

pub fn fixture_with(config: EngineConfig) -> Fixture {
    let mock = Rc::new(MockDevice::new());
    let device: Rc<dyn Device> = mock.clone();
    let runtime = Rc::new(Runtime::new(&device, config));
    Fixture {
        mock,
        device,
        runtime,
    }
}

pub const EXTENT: vk::Extent2D = vk::Extent2D {
    width: 320,
    height: 240,
};

pub fn attachment(device: &Rc<dyn Device>, format: vk::Format) -> ImageBlock {
    device
        .create_image_block(&ImageBlockDesc::color_attachment(EXTENT, format))
        .unwrap()
}

pub fn noise_texture(device: &Rc<dyn Device>) -> ImageBlock {
    device
        .create_image_block(&ImageBlockDesc::tiling_texture(
            vk::Extent2D {
                width: 4,
                height: 4,
            },
            vk::Format::R8G8B8A8_UNORM,
        ))
        .unwrap()
}

pub fn program(device: &Rc<dyn Device>) -> Rc<ShaderProgram> {
    let vertex = device.create_shader_module(&[0x0723_0203]).unwrap();
    let fragment = device.create_shader_module(&[0x0723_0203]).unwrap();
    Rc::new(ShaderProgram::from_modules(device, vertex, fragment, "main").unwrap())
}

pub fn screen_quad(device: &Rc<dyn Device>) -> Rc<Mesh> {
    Rc::new(Mesh::screen_quad(device).unwrap())
}

/// Writes `contents` to a file in the temp directory unique to this test.
pub fn write_scene(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "tsumiki_{}_{}.json",
        name,
        std::process::id()
    ));
    fs::write(&path, contents).unwrap();
    path
}

pub const THREE_ENTITY_SCENE: &str = r#"{
    "camera": {
        "position": [0, 2, 6], "target": [0, 0, 0], "up": [0, 1, 0],
        "fov_y_degrees": 60, "near": 0.1, "far": 100
    },
    "materials": {
        "red": { "albedo": [1, 0, 0], "roughness": 0.4, "metallic": 0 },
        "grey": { "albedo": [0.5, 0.5, 0.5] }
    },
    "lights": [
        { "kind": "point", "position": [0, 4, 0], "color": [1, 1, 1], "intensity": 10 },
        { "kind": "directional", "direction": [-1, -1, 0] }
    ],
    "entities": [
        {
            "name": "floor",
            "mesh": { "primitive": "plane" },
            "material": "grey",
            "transform": { "translation": [0, 0, 0], "rotation_degrees": [0, 0, 0], "scale": [10, 1, 10] }
        },
        {
            "name": "box",
            "mesh": { "primitive": "cube" },
            "material": "red",
            "transform": { "translation": [0, 0.5, 0], "rotation_degrees": [0, 45, 0] }
        },
        {
            "name": "wedge",
            "mesh": {
                "positions": [[0, 0, 0], [1, 0, 0], [0, 1, 0], [0, 0, 1]],
                "indices": [0, 2, 1, 0, 1, 3, 0, 3, 2, 1, 2, 3]
            },
            "transform": { "translation": [2, 0, 0] }
        }
    ]
}"#;
