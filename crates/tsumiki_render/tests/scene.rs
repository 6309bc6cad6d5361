mod common;

use std::rc::Rc;

use tsumiki_render::{LightKind, RenderError, Scene};
use tsumiki_vulkan::{vk, MockObject};

use common::{fixture, write_scene, THREE_ENTITY_SCENE};

#[test]
fn scene_loads_end_to_end() {
    let fixture = fixture();
    let path = write_scene("end_to_end", THREE_ENTITY_SCENE);
    let scene = Scene::load(&fixture.runtime, &path).unwrap();

    assert_eq!(scene.path(), path.as_path());
    assert_eq!(scene.camera().position.y, 2.0);
    assert_eq!(scene.meshes().len(), 3);
    assert_eq!(scene.lights().len(), 2);
    assert!(matches!(scene.lights()[0].kind, LightKind::Point { .. }));
    assert_ne!(scene.accel_structure(), vk::AccelerationStructureKHR::null());
    assert_eq!(
        scene.top_level().unwrap().level,
        vk::AccelerationStructureTypeKHR::TOP_LEVEL
    );
    // one bottom level per entity plus the top level
    assert_eq!(fixture.mock.live_count(MockObject::AccelerationStructure), 4);

    let wedge = &scene.meshes()[2];
    assert_eq!(wedge.material.name, "default");
    assert_eq!(wedge.mesh.index_count(), 12);
    assert_eq!(scene.object_data().len(), 3);
}

#[test]
fn shutdown_releases_acceleration_structures() {
    let fixture = fixture();
    let path = write_scene("shutdown", THREE_ENTITY_SCENE);
    let scene = Scene::load(&fixture.runtime, &path).unwrap();

    scene.shutdown();
    assert_eq!(scene.accel_structure(), vk::AccelerationStructureKHR::null());
    assert_eq!(fixture.mock.live_count(MockObject::AccelerationStructure), 0);
    scene.shutdown();

    scene.initialize().unwrap();
    assert_ne!(scene.accel_structure(), vk::AccelerationStructureKHR::null());
    let handle = scene.accel_structure();
    scene.initialize().unwrap();
    assert_eq!(scene.accel_structure(), handle);

    drop(scene);
    assert_eq!(fixture.mock.live_count(MockObject::AccelerationStructure), 0);
    assert_eq!(fixture.mock.live_count(MockObject::Buffer), 0);
}

#[test]
fn meshes_are_shared_between_entities() {
    let fixture = fixture();
    let path = write_scene(
        "shared",
        r#"{
            "camera": { "position": [0, 1, 5] },
            "entities": [
                { "mesh": { "primitive": "cube" } },
                { "mesh": { "primitive": "cube" }, "transform": { "translation": [2, 0, 0] } }
            ]
        }"#,
    );
    let scene = Scene::load(&fixture.runtime, &path).unwrap();
    let entities = scene.meshes();
    assert!(Rc::ptr_eq(&entities[0].mesh, &entities[1].mesh));
    assert_eq!(entities[1].name, "entity1");
}

#[test]
fn failed_build_leaves_nothing_behind() {
    let fixture = fixture();
    let path = write_scene("failed_build", THREE_ENTITY_SCENE);
    fixture.mock.fail_on(MockObject::AccelerationStructure);

    let result = Scene::load(&fixture.runtime, &path);
    assert!(matches!(result, Err(RenderError::Initialization { .. })));
    assert_eq!(fixture.mock.live_count(MockObject::AccelerationStructure), 0);
    assert_eq!(fixture.mock.live_count(MockObject::Buffer), 0);
}

#[test]
fn missing_file_is_a_load_error() {
    let fixture = fixture();
    let path = std::env::temp_dir().join("tsumiki_does_not_exist.json");
    let result = Scene::load(&fixture.runtime, &path);
    assert!(matches!(result, Err(RenderError::Load { path: p, .. }) if p == path));
}

#[test]
fn malformed_file_is_a_load_error() {
    let fixture = fixture();
    let path = write_scene("malformed", r#"{ "camera": { "position": [0, 1 "#);
    assert!(matches!(
        Scene::load(&fixture.runtime, &path),
        Err(RenderError::Load { .. })
    ));

    let path = write_scene("no_camera", r#"{ "entities": [] }"#);
    assert!(matches!(
        Scene::load(&fixture.runtime, &path),
        Err(RenderError::Load { .. })
    ));
}

#[test]
fn unknown_material_and_bad_indices_are_load_errors() {
    let fixture = fixture();
    let path = write_scene(
        "unknown_material",
        r#"{
            "camera": { "position": [0, 1, 5] },
            "entities": [{ "mesh": { "primitive": "plane" }, "material": "gold" }]
        }"#,
    );
    let result = Scene::load(&fixture.runtime, &path);
    assert!(matches!(result, Err(RenderError::Load { reason, .. }) if reason.contains("gold")));

    let path = write_scene(
        "bad_indices",
        r#"{
            "camera": { "position": [0, 1, 5] },
            "entities": [{ "mesh": { "positions": [[0, 0, 0]], "indices": [0, 1, 2] } }]
        }"#,
    );
    assert!(matches!(
        Scene::load(&fixture.runtime, &path),
        Err(RenderError::Load { .. })
    ));
    assert_eq!(fixture.mock.live_count(MockObject::Buffer), 0);
}
