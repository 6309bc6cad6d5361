mod description;

use std::{
    cell::RefCell,
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    rc::Rc,
};

use glam::Vec3;
use log::{debug, info};
use tsumiki_vulkan::{
    vk, AccelerationStructure, AccelerationStructureInput, AccelerationStructureInstance, Device,
};

use crate::{Camera, Entity, Light, Material, Mesh, PerObjectData, RenderError, Result, Runtime};
use description::{validate_inline_mesh, MeshDescription, Primitive, SceneDescription};

/// Everything that is drawn: one camera, the entities with their meshes and
/// materials, the lights, and the acceleration structures built over the
/// entity geometry for ray queries.
///
/// Entities and lights are shared read-only with the passes. The
/// acceleration structures belong to the scene alone and are released by
/// [`Scene::shutdown`] or on drop.
pub struct Scene {
    runtime: Rc<Runtime>,
    path: PathBuf,
    camera: Camera,
    entities: Vec<Rc<Entity>>,
    lights: Vec<Rc<Light>>,
    bottom_levels: RefCell<Vec<AccelerationStructure>>,
    top_level: RefCell<Option<AccelerationStructure>>,
}

impl Scene {
    /// Reads the scene file at `path`, uploads its meshes and builds the
    /// acceleration structures.
    pub fn load(runtime: &Rc<Runtime>, path: impl AsRef<Path>) -> Result<Rc<Scene>> {
        let path = path.as_ref().to_path_buf();
        let load_error = |reason: String| RenderError::Load {
            path: path.clone(),
            reason,
        };

        let text = fs::read_to_string(&path).map_err(|err| load_error(err.to_string()))?;
        let description: SceneDescription =
            serde_json::from_str(&text).map_err(|err| load_error(err.to_string()))?;

        let device = runtime.device();
        let materials: HashMap<&str, Rc<Material>> = description
            .materials
            .iter()
            .map(|(name, material)| (name.as_str(), Rc::new(material.to_material(name))))
            .collect();
        let default_material = Rc::new(Material::default());

        let mut primitives: HashMap<Primitive, Rc<Mesh>> = HashMap::new();
        let mut entities = Vec::with_capacity(description.entities.len());
        for (index, entity) in description.entities.iter().enumerate() {
            let material = match &entity.material {
                Some(name) => materials
                    .get(name.as_str())
                    .cloned()
                    .ok_or_else(|| load_error(format!("unknown material {name:?}")))?,
                None => default_material.clone(),
            };

            let mesh = match &entity.mesh {
                MeshDescription::Primitive { primitive } => match primitives.get(primitive) {
                    Some(mesh) => mesh.clone(),
                    None => {
                        let mesh = Rc::new(match primitive {
                            Primitive::Plane => Mesh::plane(device)?,
                            Primitive::Cube => Mesh::cube(device)?,
                        });
                        primitives.insert(*primitive, mesh.clone());
                        mesh
                    }
                },
                MeshDescription::Inline { positions, indices } => {
                    validate_inline_mesh(positions, indices).map_err(load_error)?;
                    let positions: Vec<Vec3> = positions.iter().copied().map(Vec3::from).collect();
                    Rc::new(Mesh::from_positions(device, &positions, indices)?)
                }
            };

            let name = if entity.name.is_empty() {
                format!("entity{index}")
            } else {
                entity.name.clone()
            };
            entities.push(Rc::new(Entity {
                name,
                mesh,
                material,
                transform: (&entity.transform).into(),
            }));
        }

        let scene = Rc::new(Scene {
            runtime: runtime.clone(),
            camera: (&description.camera).into(),
            lights: description
                .lights
                .iter()
                .map(|light| Rc::new(Light::from(light)))
                .collect(),
            entities,
            path,
            bottom_levels: RefCell::new(Vec::new()),
            top_level: RefCell::new(None),
        });
        info!(
            "Loaded scene {:?}: {} entities, {} lights",
            scene.path,
            scene.entities.len(),
            scene.lights.len()
        );

        scene.initialize()?;
        Ok(scene)
    }

    /// Builds one bottom-level structure per entity and a top-level structure
    /// over all of them. Does nothing if they are already built. On failure
    /// every structure built by this call is destroyed again.
    pub fn initialize(&self) -> Result<()> {
        if self.top_level.borrow().is_some() {
            return Ok(());
        }
        let device = self.runtime.device();

        let mut bottom_levels = Vec::with_capacity(self.entities.len());
        for entity in &self.entities {
            let geometry = entity.mesh.triangle_geometry();
            match device.build_acceleration_structure(&AccelerationStructureInput::BottomLevel(
                &geometry,
            )) {
                Ok(accel) => bottom_levels.push(accel),
                Err(err) => {
                    destroy_all(device, bottom_levels);
                    return Err(RenderError::init("bottom-level acceleration structure")(err));
                }
            }
        }

        let instances: Vec<AccelerationStructureInstance> = self
            .entities
            .iter()
            .zip(&bottom_levels)
            .enumerate()
            .map(|(index, (entity, blas))| AccelerationStructureInstance {
                transform: entity.transform.to_row_major_3x4(),
                custom_index: index as u32,
                mask: 0xff,
                bottom_level_address: blas.device_address,
            })
            .collect();

        let top_level =
            match device.build_acceleration_structure(&AccelerationStructureInput::TopLevel(
                &instances,
            )) {
                Ok(accel) => accel,
                Err(err) => {
                    destroy_all(device, bottom_levels);
                    return Err(RenderError::init("top-level acceleration structure")(err));
                }
            };
        debug!(
            "Built top-level acceleration structure over {} instances",
            instances.len()
        );

        *self.bottom_levels.borrow_mut() = bottom_levels;
        *self.top_level.borrow_mut() = Some(top_level);
        Ok(())
    }

    /// Destroys the top-level structure, then the bottom-level ones.
    pub fn shutdown(&self) {
        let device = self.runtime.device();
        if let Some(top_level) = self.top_level.borrow_mut().take() {
            device.destroy_acceleration_structure(top_level);
        }
        destroy_all(device, self.bottom_levels.take());
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn meshes(&self) -> &[Rc<Entity>] {
        &self.entities
    }

    pub fn lights(&self) -> &[Rc<Light>] {
        &self.lights
    }

    /// The top-level structure, or a null handle if it is not built.
    pub fn accel_structure(&self) -> vk::AccelerationStructureKHR {
        self.top_level
            .borrow()
            .map(|accel| accel.handle)
            .unwrap_or_default()
    }

    pub fn top_level(&self) -> Option<AccelerationStructure> {
        *self.top_level.borrow()
    }

    /// Per-object records in draw order.
    pub fn object_data(&self) -> Vec<PerObjectData> {
        self.entities
            .iter()
            .map(|entity| PerObjectData::from_entity(entity))
            .collect()
    }
}

impl Drop for Scene {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn destroy_all(device: &Rc<dyn Device>, structures: Vec<AccelerationStructure>) {
    for accel in structures {
        device.destroy_acceleration_structure(accel);
    }
}
