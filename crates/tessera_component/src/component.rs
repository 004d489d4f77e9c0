//! Component descriptors, lifecycle hooks and the component registry.
//!
//! Every piece of data stored in a world is described by a
//! [`ComponentInfo`]: a name, a byte layout and an optional set of lifecycle
//! hooks. Rust types opt in through the [`Component`] trait (data carrying,
//! `Pod`) or the [`Tag`] trait (zero sized markers). The `Pod` bound makes a
//! reorderable field layout a compile-time error, because the derive insists
//! on `#[repr(C)]` or `#[repr(transparent)]`.
//!
//! Components are entities too: the registry does not allocate ids itself,
//! the world hands it the backing entity after [`ComponentRegistry::resolve`]
//! decides that a new entry is needed.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use bytemuck::Pod;

use crate::entity::Entity;
use crate::error::ComponentError;

/// Largest supported component alignment. Column storage is aligned to it.
pub const MAX_ALIGN: usize = 16;

/// A data-carrying component.
///
/// # Examples
///
/// ```rust
/// use tessera_component::Component;
///
/// #[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
/// #[repr(C)]
/// struct Health {
///     current: f32,
///     max: f32,
/// }
///
/// impl Component for Health {
///     fn type_name() -> &'static str { "Health" }
/// }
/// ```
pub trait Component: Pod + Send + Sync {
    /// A human-readable, world-unique name for this component type.
    fn type_name() -> &'static str;
}

/// A zero-sized marker identifier.
pub trait Tag: Send + Sync + 'static {
    /// A human-readable, world-unique name for this tag.
    fn type_name() -> &'static str;
}

/// Implements [`Component`] for each listed type using its Rust name.
#[macro_export]
macro_rules! component {
    ($($ty:ident),+ $(,)?) => {
        $(
            impl $crate::Component for $ty {
                fn type_name() -> &'static str {
                    stringify!($ty)
                }
            }
        )+
    };
}

/// Implements [`Tag`] for each listed type using its Rust name.
#[macro_export]
macro_rules! tag {
    ($($ty:ident),+ $(,)?) => {
        $(
            impl $crate::Tag for $ty {
                fn type_name() -> &'static str {
                    stringify!($ty)
                }
            }
        )+
    };
}

/// Initialises or releases a value in place.
pub type ValueHook = Arc<dyn Fn(&mut [u8]) + Send + Sync>;
/// Copies `src` into `dst`.
pub type CopyHook = Arc<dyn Fn(&mut [u8], &[u8]) + Send + Sync>;
/// Moves `src` into `dst`; `src` is discarded afterwards.
pub type MoveHook = Arc<dyn Fn(&mut [u8], &mut [u8]) + Send + Sync>;

/// Byte-level lifecycle hooks of a component.
#[derive(Clone, Default)]
pub struct TypeHooks {
    pub ctor: Option<ValueHook>,
    pub dtor: Option<ValueHook>,
    pub copy: Option<CopyHook>,
    pub move_: Option<MoveHook>,
}

impl TypeHooks {
    /// Returns `true` if no hook is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ctor.is_none() && self.dtor.is_none() && self.copy.is_none() && self.move_.is_none()
    }
}

impl std::fmt::Debug for TypeHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeHooks")
            .field("ctor", &self.ctor.is_some())
            .field("dtor", &self.dtor.is_some())
            .field("copy", &self.copy.is_some())
            .field("move", &self.move_.is_some())
            .finish()
    }
}

/// Typed builder for [`TypeHooks`].
///
/// Values are read and written back with unaligned loads, so the erased
/// hooks accept any byte slice of the right length.
pub struct ComponentHooks<T> {
    ctor: Option<Arc<dyn Fn(&mut T) + Send + Sync>>,
    dtor: Option<Arc<dyn Fn(&mut T) + Send + Sync>>,
    copy: Option<Arc<dyn Fn(&mut T, &T) + Send + Sync>>,
    move_: Option<Arc<dyn Fn(&mut T, &mut T) + Send + Sync>>,
}

impl<T: Component> ComponentHooks<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ctor: None,
            dtor: None,
            copy: None,
            move_: None,
        }
    }

    /// Runs when a value is created without a source value.
    #[must_use]
    pub fn on_construct(mut self, f: impl Fn(&mut T) + Send + Sync + 'static) -> Self {
        self.ctor = Some(Arc::new(f));
        self
    }

    /// Runs before a value is discarded.
    #[must_use]
    pub fn on_destruct(mut self, f: impl Fn(&mut T) + Send + Sync + 'static) -> Self {
        self.dtor = Some(Arc::new(f));
        self
    }

    /// Runs when a value is duplicated; receives `(dst, src)`.
    #[must_use]
    pub fn on_copy(mut self, f: impl Fn(&mut T, &T) + Send + Sync + 'static) -> Self {
        self.copy = Some(Arc::new(f));
        self
    }

    /// Runs when a value is relocated; receives `(dst, src)`.
    #[must_use]
    pub fn on_move(mut self, f: impl Fn(&mut T, &mut T) + Send + Sync + 'static) -> Self {
        self.move_ = Some(Arc::new(f));
        self
    }

    /// Erases the typed hooks to byte-level hooks.
    #[must_use]
    pub fn into_type_hooks(self) -> TypeHooks {
        TypeHooks {
            ctor: self.ctor.map(erase_value_hook),
            dtor: self.dtor.map(erase_value_hook),
            copy: self.copy.map(|f| -> CopyHook {
                Arc::new(move |dst: &mut [u8], src: &[u8]| {
                    let mut value: T = bytemuck::pod_read_unaligned(dst);
                    let source: T = bytemuck::pod_read_unaligned(src);
                    f(&mut value, &source);
                    dst.copy_from_slice(bytemuck::bytes_of(&value));
                })
            }),
            move_: self.move_.map(|f| -> MoveHook {
                Arc::new(move |dst: &mut [u8], src: &mut [u8]| {
                    let mut value: T = bytemuck::pod_read_unaligned(dst);
                    let mut source: T = bytemuck::pod_read_unaligned(src);
                    f(&mut value, &mut source);
                    dst.copy_from_slice(bytemuck::bytes_of(&value));
                    src.copy_from_slice(bytemuck::bytes_of(&source));
                })
            }),
        }
    }
}

impl<T: Component> Default for ComponentHooks<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn erase_value_hook<T: Component>(f: Arc<dyn Fn(&mut T) + Send + Sync>) -> ValueHook {
    Arc::new(move |bytes: &mut [u8]| {
        let mut value: T = bytemuck::pod_read_unaligned(bytes);
        f(&mut value);
        bytes.copy_from_slice(bytemuck::bytes_of(&value));
    })
}

/// What a caller asks the registry to register.
#[derive(Debug, Clone)]
pub struct ComponentDesc {
    pub name: String,
    pub size: usize,
    pub align: usize,
    pub hooks: TypeHooks,
    pub type_id: Option<TypeId>,
}

impl ComponentDesc {
    /// Descriptor for a runtime-defined component.
    #[must_use]
    pub fn raw(name: impl Into<String>, size: usize, align: usize) -> Self {
        Self {
            name: name.into(),
            size,
            align,
            hooks: TypeHooks::default(),
            type_id: None,
        }
    }

    /// Descriptor for a Rust component type.
    #[must_use]
    pub fn of<T: Component>() -> Self {
        Self {
            name: T::type_name().to_owned(),
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            hooks: TypeHooks::default(),
            type_id: Some(TypeId::of::<T>()),
        }
    }

    /// Descriptor for a Rust tag type.
    #[must_use]
    pub fn tag<T: Tag>() -> Self {
        Self {
            name: T::type_name().to_owned(),
            size: 0,
            align: 1,
            hooks: TypeHooks::default(),
            type_id: Some(TypeId::of::<T>()),
        }
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: TypeHooks) -> Self {
        self.hooks = hooks;
        self
    }

    fn validate(&self) -> Result<(), ComponentError> {
        let reason = if !self.align.is_power_of_two() {
            Some("alignment is not a power of two")
        } else if self.align > MAX_ALIGN {
            Some("alignment exceeds 16 bytes")
        } else if self.size % self.align != 0 {
            Some("size is not a multiple of the alignment")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(ComponentError::InvalidLayout {
                name: self.name.clone(),
                size: self.size,
                align: self.align,
                reason,
            }),
            None => Ok(()),
        }
    }
}

/// A registered component.
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    pub entity: Entity,
    pub name: String,
    pub size: usize,
    pub align: usize,
    pub hooks: TypeHooks,
    pub type_id: Option<TypeId>,
}

impl ComponentInfo {
    /// Zero-sized components are tags.
    #[must_use]
    pub fn is_tag(&self) -> bool {
        self.size == 0
    }
}

/// Name / type keyed table of registered components.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    infos: Vec<ComponentInfo>,
    by_name: HashMap<String, usize>,
    by_type: HashMap<TypeId, usize>,
    by_entity: HashMap<Entity, usize>,
}

impl ComponentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks `desc` against the registry.
    ///
    /// Returns the existing entity when the name is already registered with
    /// the same layout, `None` when a new entry must be inserted.
    pub fn resolve(&mut self, desc: &ComponentDesc) -> Result<Option<Entity>, ComponentError> {
        desc.validate()?;
        let Some(&slot) = self.by_name.get(&desc.name) else {
            return Ok(None);
        };
        let info = &mut self.infos[slot];
        if info.size != desc.size || info.align != desc.align {
            return Err(ComponentError::DuplicateRegistration {
                name: desc.name.clone(),
                existing_size: info.size,
                existing_align: info.align,
                size: desc.size,
                align: desc.align,
            });
        }
        if let Some(type_id) = desc.type_id {
            info.type_id.get_or_insert(type_id);
            self.by_type.insert(type_id, slot);
        }
        if !desc.hooks.is_empty() {
            info.hooks = desc.hooks.clone();
        }
        Ok(Some(info.entity))
    }

    /// Inserts a new entry backed by `entity`. Call after [`Self::resolve`]
    /// returned `None`.
    pub fn insert(&mut self, entity: Entity, desc: ComponentDesc) -> &ComponentInfo {
        let slot = self.infos.len();
        self.by_name.insert(desc.name.clone(), slot);
        if let Some(type_id) = desc.type_id {
            self.by_type.insert(type_id, slot);
        }
        self.by_entity.insert(entity, slot);
        self.infos.push(ComponentInfo {
            entity,
            name: desc.name,
            size: desc.size,
            align: desc.align,
            hooks: desc.hooks,
            type_id: desc.type_id,
        });
        &self.infos[slot]
    }

    /// Replaces the hooks of a registered component.
    pub fn set_hooks(&mut self, entity: Entity, hooks: TypeHooks) -> Result<(), ComponentError> {
        let slot = *self
            .by_entity
            .get(&entity)
            .ok_or_else(|| ComponentError::UnknownComponent(entity.to_string()))?;
        self.infos[slot].hooks = hooks;
        Ok(())
    }

    /// Entity registered under `name`.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Entity> {
        self.by_name.get(name).map(|&slot| self.infos[slot].entity)
    }

    /// Entity registered for a Rust type.
    #[must_use]
    pub fn lookup_type(&self, type_id: TypeId) -> Option<Entity> {
        self.by_type.get(&type_id).map(|&slot| self.infos[slot].entity)
    }

    /// Descriptor of a component entity.
    #[must_use]
    pub fn info(&self, entity: Entity) -> Option<&ComponentInfo> {
        self.by_entity.get(&entity).map(|&slot| &self.infos[slot])
    }

    /// Removes a component whose backing entity was deleted.
    pub fn forget(&mut self, entity: Entity) {
        let Some(slot) = self.by_entity.remove(&entity) else {
            return;
        };
        let info = self.infos.swap_remove(slot);
        self.by_name.remove(&info.name);
        if let Some(type_id) = info.type_id {
            self.by_type.remove(&type_id);
        }
        if let Some(moved) = self.infos.get(slot) {
            self.by_name.insert(moved.name.clone(), slot);
            self.by_entity.insert(moved.entity, slot);
            if let Some(type_id) = moved.type_id {
                self.by_type.insert(type_id, slot);
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComponentInfo> {
        self.infos.iter()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Health {
        current: f32,
        max: f32,
    }

    struct Frozen;

    component!(Health);
    tag!(Frozen);

    fn register(registry: &mut ComponentRegistry, desc: ComponentDesc, next: u32) -> Entity {
        match registry.resolve(&desc).unwrap() {
            Some(existing) => existing,
            None => registry.insert(Entity::new(next, 0), desc).entity,
        }
    }

    #[test]
    fn test_registration_is_idempotent_per_name() {
        let mut registry = ComponentRegistry::new();
        let a = register(&mut registry, ComponentDesc::of::<Health>(), 10);
        let b = register(&mut registry, ComponentDesc::raw("Health", 8, 4), 11);
        assert_eq!(a, b);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("Health"), Some(a));
        assert_eq!(registry.lookup_type(TypeId::of::<Health>()), Some(a));
    }

    #[test]
    fn test_conflicting_layout_is_rejected() {
        let mut registry = ComponentRegistry::new();
        register(&mut registry, ComponentDesc::of::<Health>(), 10);
        let err = registry
            .resolve(&ComponentDesc::raw("Health", 16, 8))
            .unwrap_err();
        assert!(matches!(err, ComponentError::DuplicateRegistration { existing_size: 8, .. }));
    }

    #[test]
    fn test_invalid_layouts() {
        let mut registry = ComponentRegistry::new();
        for (size, align) in [(8, 3), (8, 32), (6, 4)] {
            let err = registry
                .resolve(&ComponentDesc::raw("Bad", size, align))
                .unwrap_err();
            assert!(matches!(err, ComponentError::InvalidLayout { .. }));
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_tag_descriptor_is_zero_sized() {
        let mut registry = ComponentRegistry::new();
        let e = register(&mut registry, ComponentDesc::tag::<Frozen>(), 3);
        let info = registry.info(e).unwrap();
        assert!(info.is_tag());
        assert_eq!(info.name, "Frozen");
    }

    #[test]
    fn test_typed_hooks_are_erased() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let counter = destroyed.clone();
        let hooks = ComponentHooks::<Health>::new()
            .on_construct(|h| h.max = 100.0)
            .on_destruct(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .on_copy(|dst, src| *dst = Health { current: src.current, max: src.max * 2.0 })
            .into_type_hooks();

        let mut bytes = [0u8; 8];
        (hooks.ctor.as_ref().unwrap())(&mut bytes);
        let value: Health = bytemuck::pod_read_unaligned(&bytes);
        assert_eq!(value.max, 100.0);

        let src = Health { current: 1.0, max: 3.0 };
        (hooks.copy.as_ref().unwrap())(&mut bytes, bytemuck::bytes_of(&src));
        let value: Health = bytemuck::pod_read_unaligned(&bytes);
        assert_eq!(value, Health { current: 1.0, max: 6.0 });

        (hooks.dtor.as_ref().unwrap())(&mut bytes);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert!(hooks.move_.is_none());
    }

    #[test]
    fn test_forget_keeps_lookups_consistent() {
        let mut registry = ComponentRegistry::new();
        let a = register(&mut registry, ComponentDesc::raw("A", 4, 4), 1);
        let b = register(&mut registry, ComponentDesc::raw("B", 8, 8), 2);
        registry.forget(a);
        assert_eq!(registry.lookup("A"), None);
        assert_eq!(registry.lookup("B"), Some(b));
        assert_eq!(registry.info(b).unwrap().size, 8);
    }
}
