//! Cash ledger schema.
//!
//! Creates projects, expenditure categories, the append-only ledger, the
//! per-scope head rows writers serialize on, and the triggers guarding ledger
//! immutability.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();

        // ============================================================
        // PART 1: ENUMS
        // ============================================================
        db.execute_unprepared(ENUMS_SQL).await?;

        // ============================================================
        // PART 2: PROJECTS & EXPENDITURE CATEGORIES
        // ============================================================
        db.execute_unprepared(PROJECTS_SQL).await?;
        db.execute_unprepared(PROJECT_EXPENDITURES_SQL).await?;

        // ============================================================
        // PART 3: LEDGER
        // ============================================================
        db.execute_unprepared(LEDGER_ENTRIES_SQL).await?;
        db.execute_unprepared(LEDGER_SCOPES_SQL).await?;

        // ============================================================
        // PART 4: TRIGGERS & FUNCTIONS
        // ============================================================
        db.execute_unprepared(TRIGGERS_SQL).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(DROP_ALL_SQL).await?;
        Ok(())
    }
}

// ============================================================
// SQL CONSTANTS
// ============================================================

const ENUMS_SQL: &str = r"
CREATE TYPE ledger_direction AS ENUM ('inbound', 'outbound');
";

const PROJECTS_SQL: &str = r"
CREATE TABLE projects (
    id BIGSERIAL PRIMARY KEY,
    name VARCHAR(255) NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT '',
    inspector_id BIGINT NOT NULL,
    budget NUMERIC(19, 4) NOT NULL DEFAULT 0,
    income NUMERIC(19, 4) NOT NULL DEFAULT 0,
    created_by BIGINT,
    updated_by BIGINT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_projects_inspector_positive CHECK (inspector_id > 0),
    CONSTRAINT chk_projects_budget_non_negative CHECK (budget >= 0)
);

CREATE INDEX idx_projects_inspector ON projects(inspector_id);
";

const PROJECT_EXPENDITURES_SQL: &str = r"
CREATE TABLE project_expenditures (
    id BIGSERIAL PRIMARY KEY,
    project_id BIGINT NOT NULL REFERENCES projects(id) ON DELETE RESTRICT,
    sequence INT NOT NULL,
    name VARCHAR(255) NOT NULL,
    total_price NUMERIC(19, 4) NOT NULL DEFAULT 0,
    is_fixed_cost BOOLEAN NOT NULL DEFAULT true,
    updated_by BIGINT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (project_id, sequence)
);

CREATE INDEX idx_project_expenditures_project ON project_expenditures(project_id);
";

const LEDGER_ENTRIES_SQL: &str = r"
CREATE TABLE ledger_entries (
    id BIGSERIAL PRIMARY KEY,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    inspector_id BIGINT,
    project_id BIGINT REFERENCES projects(id) ON DELETE RESTRICT,
    direction ledger_direction NOT NULL,
    reference_id BIGINT REFERENCES project_expenditures(id) ON DELETE RESTRICT,
    reference_label VARCHAR(255) NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    unit_price NUMERIC(19, 4) NOT NULL,
    quantity BIGINT NOT NULL,
    total_amount NUMERIC(19, 4) NOT NULL,
    inspector_prior_balance NUMERIC(19, 4),
    inspector_new_balance NUMERIC(19, 4),
    project_prior_balance NUMERIC(19, 4),
    project_new_balance NUMERIC(19, 4),
    receipt_ref TEXT,
    reverses_entry_id BIGINT UNIQUE REFERENCES ledger_entries(id),
    is_cancelled BOOLEAN NOT NULL DEFAULT false,
    created_by BIGINT NOT NULL,
    CONSTRAINT chk_le_has_owner CHECK (inspector_id IS NOT NULL OR project_id IS NOT NULL),
    CONSTRAINT chk_le_owner_positive CHECK (
        COALESCE(inspector_id, 1) > 0 AND COALESCE(project_id, 1) > 0
    ),
    CONSTRAINT chk_le_amounts_positive CHECK (
        unit_price > 0 AND quantity > 0 AND total_amount > 0
    ),
    CONSTRAINT chk_le_total CHECK (total_amount = unit_price * quantity),
    CONSTRAINT chk_le_inspector_snapshot CHECK (
        (inspector_id IS NULL) = (inspector_prior_balance IS NULL)
        AND (inspector_id IS NULL) = (inspector_new_balance IS NULL)
    ),
    CONSTRAINT chk_le_project_snapshot CHECK (
        (project_id IS NULL) = (project_prior_balance IS NULL)
        AND (project_id IS NULL) = (project_new_balance IS NULL)
    ),
    CONSTRAINT chk_le_inspector_arithmetic CHECK (
        inspector_new_balance = inspector_prior_balance
            + CASE direction WHEN 'inbound' THEN total_amount ELSE -total_amount END
    ),
    CONSTRAINT chk_le_project_arithmetic CHECK (
        project_new_balance = project_prior_balance
            + CASE direction WHEN 'inbound' THEN total_amount ELSE -total_amount END
    ),
    CONSTRAINT chk_le_non_negative CHECK (
        COALESCE(inspector_new_balance, 0) >= 0 AND COALESCE(project_new_balance, 0) >= 0
    ),
    CONSTRAINT chk_le_reversal_inbound CHECK (
        reverses_entry_id IS NULL OR direction = 'inbound'
    ),
    CONSTRAINT chk_le_reference_project CHECK (
        reference_id IS NULL OR project_id IS NOT NULL
    )
);

CREATE INDEX idx_le_inspector_chain ON ledger_entries(inspector_id, created_at DESC, id DESC)
    WHERE NOT is_cancelled;
CREATE INDEX idx_le_project_chain ON ledger_entries(project_id, created_at DESC, id DESC)
    WHERE NOT is_cancelled;
CREATE INDEX idx_le_inspector_history ON ledger_entries(inspector_id, created_at DESC, id DESC);
CREATE INDEX idx_le_project_history ON ledger_entries(project_id, created_at DESC, id DESC);
CREATE INDEX idx_le_reference ON ledger_entries(reference_id) WHERE reference_id IS NOT NULL;
";

const LEDGER_SCOPES_SQL: &str = r"
CREATE TABLE ledger_scopes (
    scope_kind VARCHAR(16) NOT NULL,
    scope_id BIGINT NOT NULL,
    version BIGINT NOT NULL DEFAULT 0,
    last_entry_id BIGINT REFERENCES ledger_entries(id),
    last_entry_at TIMESTAMPTZ,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (scope_kind, scope_id),
    CONSTRAINT chk_scope_kind CHECK (scope_kind IN ('inspector', 'project')),
    CONSTRAINT chk_scope_version CHECK (version >= 0)
);
";

const TRIGGERS_SQL: &str = r"
-- ============================================================
-- FUNCTION: prevent_ledger_mutation
-- Entries are append-only; only is_cancelled may flip, and only to true
-- ============================================================
CREATE OR REPLACE FUNCTION prevent_ledger_mutation()
RETURNS TRIGGER AS $$
BEGIN
    IF TG_OP = 'DELETE' THEN
        RAISE EXCEPTION 'Ledger entries cannot be deleted. Cancel the entry instead.';
    END IF;

    IF OLD.is_cancelled AND NOT NEW.is_cancelled THEN
        RAISE EXCEPTION 'Cannot restore cancelled ledger entry %', OLD.id;
    END IF;

    IF (to_jsonb(NEW) - 'is_cancelled') <> (to_jsonb(OLD) - 'is_cancelled') THEN
        RAISE EXCEPTION 'Ledger entry % is immutable except for is_cancelled', OLD.id;
    END IF;

    RETURN NEW;
END;
$$ LANGUAGE plpgsql;

CREATE TRIGGER trg_prevent_ledger_update
BEFORE UPDATE ON ledger_entries
FOR EACH ROW
EXECUTE FUNCTION prevent_ledger_mutation();

CREATE TRIGGER trg_prevent_ledger_delete
BEFORE DELETE ON ledger_entries
FOR EACH ROW
EXECUTE FUNCTION prevent_ledger_mutation();

-- ============================================================
-- FUNCTION: touch_updated_at
-- ============================================================
CREATE OR REPLACE FUNCTION touch_updated_at()
RETURNS TRIGGER AS $$
BEGIN
    NEW.updated_at = now();
    RETURN NEW;
END;
$$ LANGUAGE plpgsql;

CREATE TRIGGER trg_projects_updated_at
BEFORE UPDATE ON projects
FOR EACH ROW
EXECUTE FUNCTION touch_updated_at();

CREATE TRIGGER trg_project_expenditures_updated_at
BEFORE UPDATE ON project_expenditures
FOR EACH ROW
EXECUTE FUNCTION touch_updated_at();

CREATE TRIGGER trg_ledger_scopes_updated_at
BEFORE UPDATE ON ledger_scopes
FOR EACH ROW
EXECUTE FUNCTION touch_updated_at();
";

const DROP_ALL_SQL: &str = r"
DROP TABLE IF EXISTS ledger_scopes CASCADE;
DROP TABLE IF EXISTS ledger_entries CASCADE;
DROP TABLE IF EXISTS project_expenditures CASCADE;
DROP TABLE IF EXISTS projects CASCADE;
DROP FUNCTION IF EXISTS prevent_ledger_mutation() CASCADE;
DROP FUNCTION IF EXISTS touch_updated_at() CASCADE;
DROP TYPE IF EXISTS ledger_direction;
";
