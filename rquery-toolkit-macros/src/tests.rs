use syn::DeriveInput;

fn gen(input: DeriveInput) -> String {
    crate::entity_impl(input).to_string()
}

#[test]
fn generates_entity_and_from_row_impls() {
    let input: DeriveInput = syn::parse_quote! {
        #[table(name = "Products", schema = "dbo")]
        struct Product {
            #[key(is_identity = true)]
            #[column(name = "Id")]
            id: i32,
            #[column(name = "Name", required)]
            name: String,
            price: Option<Decimal>,
        }
    };

    let s = gen(input);

    assert!(s.contains("impl :: rquery_toolkit :: mapping :: Entity for Product"));
    assert!(s.contains("impl :: rquery_toolkit :: mapping :: FromRow for Product"));
    assert!(s.contains("builder (\"Products\")"));
    assert!(s.contains(". schema (\"dbo\")"));
    assert!(s.contains("pub const TABLE : & 'static str = \"Products\" ;"));
    assert!(s.contains("pub const id : & 'static str = \"Id\" ;"));
    assert!(s.contains("pub const price : & 'static str = \"price\" ;"));
}

#[test]
fn translates_field_attributes_into_descriptor_flags() {
    let input: DeriveInput = syn::parse_quote! {
        struct OrderLine {
            #[key] order_id: i32,
            #[key] line_no: i32,
            #[column(computed)] total: f64,
            #[column(required = true)] sku: String,
            note: Option<String>,
        }
    };

    let s = gen(input);

    // table falls back to the struct name
    assert!(s.contains("builder (\"OrderLine\")"));
    assert!(!s.contains(". schema"));
    assert!(s.contains("FieldDescriptor :: new (\"order_id\" , :: rquery_toolkit :: query :: SqlType :: Int ,) . key ()"));
    assert!(s.contains("SqlType :: Float ,) . computed ()"));
    assert!(s.contains("SqlType :: Text ,) . required ()"));
    assert!(s.contains("SqlType :: Text ,) . nullable ()"));
    assert!(!s.contains(". identity ()"));
}

#[test]
fn not_mapped_fields_are_declared_and_defaulted() {
    let input: DeriveInput = syn::parse_quote! {
        struct Customer {
            #[key] id: i64,
            #[not_mapped] display: String,
            #[column(ignore)] scratch: i32,
        }
    };

    let s = gen(input);

    assert!(s.contains(". not_mapped (\"display\")"));
    assert!(s.contains(". not_mapped (\"scratch\")"));
    assert!(s.contains("display : :: std :: default :: Default :: default ()"));
    assert!(!s.contains(". add (\"display\""));
    assert!(s.contains(". add (\"id\" , :: std :: clone :: Clone :: clone (& self . id))"));
    assert!(s.contains("id : row . get_or_default :: < i64 > (\"id\") ?"));
}

#[test]
fn rejects_unsupported_field_types() {
    let input: DeriveInput = syn::parse_quote! {
        struct Bad {
            #[key] id: i32,
            tags: HashMap<String, String>,
        }
    };

    let s = gen(input);

    assert!(s.contains("compile_error"));
    assert!(s.contains("unsupported field type"));
}

#[test]
fn rejects_tuple_structs() {
    let input: DeriveInput = syn::parse_quote! {
        struct Pair(i32, i32);
    };

    let s = gen(input);

    assert!(s.contains("Entity requires a struct with named fields"));
}
