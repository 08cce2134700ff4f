//! Well-known objects of a realm
//!
//! Prototypes are allocated before the builtins are installed so that every
//! builtin file can refer to them; their methods are filled in by
//! `builtins::install`.

use crate::gc::{ChunkId, Heap};
use crate::value::{JsObject, JsString, JsSymbol, ObjectRef};

#[derive(Debug, Clone)]
pub struct Intrinsics {
    pub object_prototype: ObjectRef,
    pub function_prototype: ObjectRef,
    pub array_prototype: ObjectRef,
    pub error_prototype: ObjectRef,
    pub type_error_prototype: ObjectRef,
    pub range_error_prototype: ObjectRef,
    pub reference_error_prototype: ObjectRef,
    pub syntax_error_prototype: ObjectRef,
    pub suppressed_error_prototype: ObjectRef,
    pub promise_prototype: ObjectRef,
    pub iterator_prototype: ObjectRef,
    pub array_iterator_prototype: ObjectRef,
    /// Shared by Set/Map iterators and `for-in` key lists
    pub list_iterator_prototype: ObjectRef,
    pub generator_prototype: ObjectRef,
    /// `[Symbol.asyncIterator]() { return this }`
    pub async_iterator_prototype: ObjectRef,
    pub async_generator_prototype: ObjectRef,
    pub set_prototype: ObjectRef,
    pub map_prototype: ObjectRef,

    pub iterator_symbol: JsSymbol,
    pub async_iterator_symbol: JsSymbol,
    pub dispose_symbol: JsSymbol,
    pub async_dispose_symbol: JsSymbol,
    pub to_string_tag_symbol: JsSymbol,
}

impl Intrinsics {
    pub(crate) fn new(heap: &mut Heap, realm: ChunkId, next_symbol_id: &mut u64) -> Self {
        let mut proto = |parent: Option<ObjectRef>| {
            let id = heap.alloc_object(JsObject::ordinary(parent));
            heap.add_edge(realm, id);
            id
        };
        let object_prototype = proto(None);
        let function_prototype = proto(Some(object_prototype));
        let array_prototype = proto(Some(object_prototype));
        let error_prototype = proto(Some(object_prototype));
        let type_error_prototype = proto(Some(error_prototype));
        let range_error_prototype = proto(Some(error_prototype));
        let reference_error_prototype = proto(Some(error_prototype));
        let syntax_error_prototype = proto(Some(error_prototype));
        let suppressed_error_prototype = proto(Some(error_prototype));
        let promise_prototype = proto(Some(object_prototype));
        let iterator_prototype = proto(Some(object_prototype));
        let array_iterator_prototype = proto(Some(iterator_prototype));
        let list_iterator_prototype = proto(Some(iterator_prototype));
        let generator_prototype = proto(Some(iterator_prototype));
        let async_iterator_prototype = proto(Some(object_prototype));
        let async_generator_prototype = proto(Some(async_iterator_prototype));
        let set_prototype = proto(Some(object_prototype));
        let map_prototype = proto(Some(object_prototype));

        let mut symbol = |description: &str| {
            *next_symbol_id += 1;
            JsSymbol::new(*next_symbol_id, Some(JsString::from(description)))
        };

        Self {
            object_prototype,
            function_prototype,
            array_prototype,
            error_prototype,
            type_error_prototype,
            range_error_prototype,
            reference_error_prototype,
            syntax_error_prototype,
            suppressed_error_prototype,
            promise_prototype,
            iterator_prototype,
            array_iterator_prototype,
            list_iterator_prototype,
            generator_prototype,
            async_iterator_prototype,
            async_generator_prototype,
            set_prototype,
            map_prototype,
            iterator_symbol: symbol("Symbol.iterator"),
            async_iterator_symbol: symbol("Symbol.asyncIterator"),
            dispose_symbol: symbol("Symbol.dispose"),
            async_dispose_symbol: symbol("Symbol.asyncDispose"),
            to_string_tag_symbol: symbol("Symbol.toStringTag"),
        }
    }

    /// Prototype for errors of constructor `name`
    pub fn error_prototype_for(&self, name: &str) -> ObjectRef {
        match name {
            "TypeError" => self.type_error_prototype,
            "RangeError" => self.range_error_prototype,
            "ReferenceError" => self.reference_error_prototype,
            "SyntaxError" => self.syntax_error_prototype,
            "SuppressedError" => self.suppressed_error_prototype,
            _ => self.error_prototype,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prototype_chain_shape() {
        let mut heap = Heap::new();
        let realm = heap.alloc_root();
        let mut next = 0;
        let intrinsics = Intrinsics::new(&mut heap, realm, &mut next);

        let type_error = heap.object(intrinsics.type_error_prototype).unwrap();
        assert_eq!(type_error.prototype, Some(intrinsics.error_prototype));
        let generator = heap.object(intrinsics.generator_prototype).unwrap();
        assert_eq!(generator.prototype, Some(intrinsics.iterator_prototype));
        let async_generator = heap.object(intrinsics.async_generator_prototype).unwrap();
        assert_eq!(async_generator.prototype, Some(intrinsics.async_iterator_prototype));
        assert_eq!(next, 5);
        assert_ne!(intrinsics.dispose_symbol, intrinsics.async_dispose_symbol);
    }
}
