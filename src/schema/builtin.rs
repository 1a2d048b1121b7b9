//! Built-in maps for the legacy CRM tables.

use super::{Collection, FieldSpec, Literal, TableSchema, Transform};

use Transform::*;

const FIRST: Literal = Literal::Int(1);

static USERS: TableSchema = TableSchema {
    collection: Collection::Users,
    source_table: "register_user",
    natural_key: "email",
    fields: &[
        FieldSpec::column("name", 1, &[Cap(100), BlankAsNull, Default(Literal::Text("Unknown"))]),
        FieldSpec::required("email", 2, &[Trim, Lowercase]),
        FieldSpec::column("mobile", 3, &[]),
        FieldSpec::column("password", 4, &[Default(Literal::Text(""))]),
        FieldSpec::fixed("role", Literal::Text("student")),
        FieldSpec::column(
            "isActive",
            5,
            &[Flag {
                equals: 1.0,
                then: Literal::Bool(true),
                otherwise: Literal::Bool(false),
            }],
        ),
    ],
};

static COURSES: TableSchema = TableSchema {
    collection: Collection::Courses,
    source_table: "crm_course_details",
    natural_key: "title",
    fields: &[
        FieldSpec::required("title", 1, &[Cap(200)]),
        FieldSpec::column(
            "description",
            2,
            &[BlankAsNull, StripTags, Default(Literal::Text("Course Description"))],
        ),
        FieldSpec::fixed_with("instructor", FIRST, &[Reference(Collection::Users)]),
        FieldSpec::fixed("category", Literal::Text("Optional")),
        FieldSpec::fixed("level", Literal::Text("advanced")),
        FieldSpec::fixed("price", Literal::Int(0)),
        FieldSpec::fixed("isPublished", Literal::Bool(true)),
    ],
};

static BATCHES: TableSchema = TableSchema {
    collection: Collection::Batches,
    source_table: "crm_batch_details",
    natural_key: "name",
    fields: &[
        FieldSpec::required("name", 3, &[Cap(100)]),
        FieldSpec::column("course", 1, &[Reference(Collection::Courses)]),
        FieldSpec::fixed_with("instructor", FIRST, &[Reference(Collection::Users)]),
        FieldSpec::column("startDate", 8, &[ZeroAsNull, Date, Default(Literal::Now)]),
        FieldSpec::column("endDate", 9, &[ZeroAsNull, Date, Default(Literal::Now)]),
        FieldSpec::column(
            "maxStudents",
            7,
            &[IntFloor, ZeroAsNull, Default(Literal::Int(50))],
        ),
        FieldSpec::column(
            "status",
            14,
            &[Flag {
                equals: 1.0,
                then: Literal::Text("active"),
                otherwise: Literal::Text("upcoming"),
            }],
        ),
        FieldSpec::column(
            "description",
            12,
            &[Cap(500), BlankAsNull, StripTags, Default(Literal::Text("Batch"))],
        ),
    ],
};

static SUBJECTS: TableSchema = TableSchema {
    collection: Collection::Subjects,
    source_table: "crm_subject_details",
    natural_key: "title",
    fields: &[
        FieldSpec::required("title", 2, &[Cap(200)]),
        FieldSpec::column("course", 1, &[Reference(Collection::Courses)]),
        FieldSpec::column("description", 3, &[StripTags, Default(Literal::Text(""))]),
    ],
};

static VIDEOS: TableSchema = TableSchema {
    collection: Collection::Videos,
    source_table: "crm_android_videos",
    natural_key: "youtubeVideoId",
    fields: &[
        FieldSpec::column("title", 6, &[BlankAsNull, Default(Literal::Text("Video"))]),
        FieldSpec::column("batch", 1, &[Reference(Collection::Batches)]),
        FieldSpec::column("course", 2, &[Reference(Collection::Courses)]),
        FieldSpec::column("subject", 4, &[Reference(Collection::Subjects)]),
        FieldSpec::required("youtubeVideoId", 7, &[Trim]),
        FieldSpec::column("status", 8, &[IntFloor, ZeroAsNull, Default(Literal::Int(1))]),
        FieldSpec::fixed("views", Literal::Int(0)),
    ],
};

static ENQUIRIES: TableSchema = TableSchema {
    collection: Collection::Enquiries,
    source_table: "crm_enquiry_details",
    natural_key: "email",
    fields: &[
        FieldSpec::column("name", 1, &[BlankAsNull, Default(Literal::Text("Unknown"))]),
        FieldSpec::required("email", 2, &[Trim, Lowercase]),
        FieldSpec::column("mobile", 3, &[Default(Literal::Text(""))]),
        FieldSpec::column("course", 4, &[BlankAsNull, Default(Literal::Text("General"))]),
        FieldSpec::column("message", 5, &[Cap(500), Default(Literal::Text(""))]),
        FieldSpec::column("status", 6, &[BlankAsNull, Default(Literal::Text("pending"))]),
    ],
};

static TRANSACTIONS: TableSchema = TableSchema {
    collection: Collection::Transactions,
    source_table: "crm_transaction_details",
    natural_key: "transactionId",
    fields: &[
        FieldSpec::required("transactionId", 5, &[Trim]),
        FieldSpec::column("amount", 3, &[Float, Default(Literal::Float(0.0))]),
        FieldSpec::column(
            "paymentMethod",
            4,
            &[Lowercase, BlankAsNull, Default(Literal::Text("offline"))],
        ),
        FieldSpec::column("status", 6, &[BlankAsNull, Default(Literal::Text("pending"))]),
        FieldSpec::column("notes", 7, &[Cap(500), Default(Literal::Text(""))]),
        FieldSpec::column("legacyUserId", 1, &[IntFloor]),
        FieldSpec::column("legacyBatchId", 2, &[IntFloor]),
    ],
};

/// All built-in maps, in import order
pub static BUILTIN_SCHEMAS: [&TableSchema; 7] = [
    &USERS,
    &COURSES,
    &BATCHES,
    &SUBJECTS,
    &VIDEOS,
    &ENQUIRIES,
    &TRANSACTIONS,
];

pub fn schema_for(collection: Collection) -> &'static TableSchema {
    match collection {
        Collection::Users => &USERS,
        Collection::Courses => &COURSES,
        Collection::Batches => &BATCHES,
        Collection::Subjects => &SUBJECTS,
        Collection::Videos => &VIDEOS,
        Collection::Enquiries => &ENQUIRIES,
        Collection::Transactions => &TRANSACTIONS,
    }
}
