use crate::{
    api::{envelope::Success, error::ErrorBody, extract::Input},
    auth::{AuthContext, Permission},
    crud::CrudService,
    error::Error,
    resources::{Role, RolePermissionSetting},
};
use axum::extract::Extension;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct PermissionSettingResult {
    pub role_ids: Vec<i64>,
}

#[utoipa::path(
    patch,
    path = "/api/v1/system/role/permission/setting",
    request_body(content = Object, description = "`{role_ids, permissions, data_scope, dept_ids}`"),
    responses(
        (status = 200, description = "Permissions replaced on every listed role", body = PermissionSettingResult),
        (status = 403, description = "Missing system:role:permission", body = ErrorBody),
        (status = 404, description = "A role does not exist or is not visible", body = ErrorBody),
        (status = 422, description = "Unknown permission or bad data scope", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "system",
)]
/// Replace permissions, data scope and custom departments of a batch of roles.
pub async fn permission_setting(
    Extension(roles): Extension<CrudService<Role>>,
    context: AuthContext,
    input: Input,
) -> Result<Success<PermissionSettingResult>, Error> {
    let grant = context.authorize(Permission::RolePermission)?;
    let setting: RolePermissionSetting = input.valid_json()?;
    let updated = roles
        .patch_each(&grant, &setting.role_ids, |role| setting.apply_to(role))
        .await?;

    let role_ids = updated.iter().map(|role| role.meta.id).collect();
    Ok(Success::new(PermissionSettingResult { role_ids }, "updated"))
}
