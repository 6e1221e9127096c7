use crate::parsing::languages::TSLanguageConfig;

pub fn go_language_config() -> TSLanguageConfig {
    TSLanguageConfig {
        language_ids: &["Go", "go"],
        file_extensions: &["go"],
        grammar: tree_sitter_go::language,
        symbol_query: vec![
            "(method_declaration name: (field_identifier) @method.name) @method.body".to_owned(),
            "(function_declaration name: (identifier) @function.name) @function.body".to_owned(),
            // struct and interface types both hang off type_declaration, the
            // inner type node decides which kind we record
            "(type_declaration
                (type_spec name: (type_identifier) @class.name type: (struct_type)))
            @class.body"
                .to_owned(),
            "(type_declaration
                (type_spec name: (type_identifier) @interface.name type: (interface_type)))
            @interface.body"
                .to_owned(),
            "(field_declaration name: (field_identifier) @field.name) @field.body".to_owned(),
        ],
    }
}
